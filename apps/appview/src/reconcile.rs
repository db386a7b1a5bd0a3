//! Reconciliation pass: no distributed transaction spans PDS, knot and
//! local state, so an operator tool walks local records and verifies each
//! has a PDS counterpart. Drift is reported, never auto-repaired.

use std::sync::Arc;

use tangled_db::{Db, DbError, repos};
use tangled_types::{AtUri, Did};
use tangled_xrpc::{IdResolver, PdsClient};

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub checked: usize,
    /// Local rows whose PDS record no longer exists.
    pub missing_upstream: Vec<String>,
    /// Rows whose owner identity could not be resolved; unknown state.
    pub unresolvable: Vec<String>,
}

pub async fn reconcile_repos(
    db: &Db,
    pds: &PdsClient,
    identities: &Arc<IdResolver>,
) -> Result<ReconcileReport, DbError> {
    let mut report = ReconcileReport::default();

    let all: Vec<tangled_db::repos::Repo> = {
        let mut out = Vec::new();
        // walk per-knot to keep result sets bounded
        for registration in tangled_db::knots::list_verified(db.pool()).await? {
            out.extend(repos::list_by_knot(db.pool(), &registration.domain).await?);
        }
        out
    };

    for repo in all {
        report.checked += 1;
        let Ok(at_uri) = AtUri::parse(&repo.at_uri) else {
            report.unresolvable.push(repo.at_uri.clone());
            continue;
        };
        let Ok(owner) = Did::new(repo.did.clone()) else {
            report.unresolvable.push(repo.at_uri.clone());
            continue;
        };
        let identity = match identities.resolve_did(&owner).await {
            Ok(identity) => identity,
            Err(err) => {
                tracing::warn!(repo = %repo.at_uri, "identity unresolvable: {err}");
                report.unresolvable.push(repo.at_uri.clone());
                continue;
            }
        };
        match pds
            .get_record(&identity.pds, &owner, at_uri.collection(), at_uri.rkey())
            .await
        {
            Ok(_) => {}
            Err(err) if err.status().is_some_and(|s| s.as_u16() == 400 || s.as_u16() == 404) => {
                report.missing_upstream.push(repo.at_uri.clone());
            }
            Err(err) => {
                tracing::warn!(repo = %repo.at_uri, "reconcile fetch failed: {err}");
                report.unresolvable.push(repo.at_uri.clone());
            }
        }
    }
    Ok(report)
}
