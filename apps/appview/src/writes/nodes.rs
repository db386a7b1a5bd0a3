//! Knot and spindle registration, plus the owner-proof verification that
//! moves a node from announced to verified. Verified nodes are picked up by
//! the caller and added to the event consumer's source set (active).

use chrono::Utc;
use rand::Rng;

use tangled_db::{DbError, knots, spindles};
use tangled_types::Did;

use super::{WriteCtx, WriteError};

/// 32 bytes of hex, issued at announcement, shown to the operator once.
fn registration_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn validate_domain(domain: &str, dev: bool) -> Result<(), WriteError> {
    let shape_ok = !domain.is_empty()
        && !domain.contains("://")
        && !domain.contains('/')
        && !domain.contains(char::is_whitespace);
    // production nodes must be fully qualified; dev allows localhost:port
    let qualified = dev || domain.contains('.');
    if shape_ok && qualified {
        Ok(())
    } else {
        Err(WriteError::Validation(format!("invalid domain {domain:?}")))
    }
}

/// Announce a knot. Returns the registration secret exactly once.
pub async fn register_knot(
    ctx: &WriteCtx,
    by: &Did,
    domain: &str,
    dev: bool,
) -> Result<String, WriteError> {
    validate_domain(domain, dev)?;
    if knots::get_by_domain(ctx.db.pool(), domain).await?.is_some() {
        return Err(WriteError::Validation(format!("knot {domain} is already registered")));
    }
    let secret = registration_secret();
    knots::create(ctx.db.pool(), domain, by.as_str(), &secret, Utc::now()).await?;
    Ok(secret)
}

/// Owner proof: `GET https://<domain>/owner` must answer exactly the DID
/// that announced the registration. On success the knot becomes verified
/// and its role rules plus the owner grouping are installed.
pub async fn verify_knot(ctx: &WriteCtx, domain: &str) -> Result<knots::Registration, WriteError> {
    let registration = knots::get_by_domain(ctx.db.pool(), domain)
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("knot {domain}")))?;
    if registration.verified {
        return Ok(registration);
    }

    let proved = ctx.nodes.owner(domain).await?;
    if proved.as_str() != registration.did {
        return Err(WriteError::Validation(format!(
            "owner proof mismatch: {domain} answers for {proved}"
        )));
    }

    let outcome = async {
        let mut tx = ctx.db.begin().await?;
        knots::mark_verified(&mut *tx, domain).await?;
        ctx.enforcer.add_knot(domain);
        ctx.enforcer.add_knot_owner(domain, &registration.did);
        tx.commit().await.map_err(DbError::from)?;
        if let Err(err) = ctx.enforcer.save_policy().await {
            ctx.enforcer.load_policy().await?;
            return Err(err.into());
        }
        Ok(())
    }
    .await;
    if let Err(err) = outcome {
        if let Err(reload) = ctx.enforcer.load_policy().await {
            tracing::error!("policy reload after failed verification: {reload}");
        }
        return Err(err);
    }

    knots::get_by_domain(ctx.db.pool(), domain)
        .await?
        .ok_or_else(|| WriteError::Integrity(format!("registration for {domain} vanished")))
}

pub async fn remove_knot(ctx: &WriteCtx, domain: &str) -> Result<(), WriteError> {
    let removed = knots::delete(ctx.db.pool(), domain).await?;
    if !removed {
        return Err(WriteError::NotFound(format!("knot {domain}")));
    }
    Ok(())
}

/// Announce a spindle. Symmetric to knots, minus the shared secret.
pub async fn register_spindle(
    ctx: &WriteCtx,
    by: &Did,
    domain: &str,
    dev: bool,
) -> Result<(), WriteError> {
    validate_domain(domain, dev)?;
    if spindles::get_by_domain(ctx.db.pool(), domain).await?.is_some() {
        return Err(WriteError::Validation(format!(
            "spindle {domain} is already registered"
        )));
    }
    spindles::create(ctx.db.pool(), domain, by.as_str(), Utc::now()).await?;
    Ok(())
}

pub async fn verify_spindle(ctx: &WriteCtx, domain: &str) -> Result<spindles::Spindle, WriteError> {
    let spindle = spindles::get_by_domain(ctx.db.pool(), domain)
        .await?
        .ok_or_else(|| WriteError::NotFound(format!("spindle {domain}")))?;
    if spindle.verified {
        return Ok(spindle);
    }

    let proved = ctx.nodes.owner(domain).await?;
    if proved.as_str() != spindle.did {
        return Err(WriteError::Validation(format!(
            "owner proof mismatch: {domain} answers for {proved}"
        )));
    }

    let outcome = async {
        let mut tx = ctx.db.begin().await?;
        spindles::mark_verified(&mut *tx, domain).await?;
        ctx.enforcer.add_spindle(domain);
        ctx.enforcer.add_spindle_owner(domain, &spindle.did);
        tx.commit().await.map_err(DbError::from)?;
        if let Err(err) = ctx.enforcer.save_policy().await {
            ctx.enforcer.load_policy().await?;
            return Err(err.into());
        }
        Ok(())
    }
    .await;
    if let Err(err) = outcome {
        if let Err(reload) = ctx.enforcer.load_policy().await {
            tracing::error!("policy reload after failed verification: {reload}");
        }
        return Err(err);
    }

    spindles::get_by_domain(ctx.db.pool(), domain)
        .await?
        .ok_or_else(|| WriteError::Integrity(format!("spindle {domain} vanished")))
}
