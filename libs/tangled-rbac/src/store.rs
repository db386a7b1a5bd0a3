//! Durable policy rows. They live in the `acl_rules` table of the appview
//! database so that entity rows and policy share one durability story.

use sqlx::SqlitePool;

use crate::error::RbacError;
use crate::policy::{Grouping, Policy, Rule};

const KIND_RULE: &str = "p";
const KIND_GROUPING: &str = "g";

#[derive(sqlx::FromRow)]
struct AclRow {
    kind: String,
    subject: String,
    domain: String,
    resource: String,
    action: String,
}

/// Load the full policy from the table.
pub async fn load(pool: &SqlitePool) -> Result<Policy, RbacError> {
    let rows: Vec<AclRow> =
        sqlx::query_as("SELECT kind, subject, domain, resource, action FROM acl_rules")
            .fetch_all(pool)
            .await?;
    let mut policy = Policy::default();
    for row in rows {
        match row.kind.as_str() {
            KIND_RULE => policy.add_rule(&row.subject, &row.domain, &row.resource, &row.action),
            KIND_GROUPING => policy.add_grouping(&row.subject, &row.resource, &row.domain),
            other => {
                return Err(RbacError::Corrupt(format!("unknown acl rule kind {other:?}")));
            }
        }
    }
    Ok(policy)
}

/// Replace the stored policy with the given in-memory one, atomically.
/// This is the durable commit point for every policy mutation.
pub async fn save(pool: &SqlitePool, policy: &Policy) -> Result<(), RbacError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM acl_rules").execute(&mut *tx).await?;
    for Rule {
        subject,
        domain,
        resource,
        action,
    } in &policy.rules
    {
        sqlx::query(
            "INSERT INTO acl_rules (kind, subject, domain, resource, action)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(KIND_RULE)
        .bind(subject)
        .bind(domain)
        .bind(resource)
        .bind(action)
        .execute(&mut *tx)
        .await?;
    }
    for Grouping {
        subject,
        role,
        domain,
    } in &policy.groupings
    {
        // groupings reuse the resource column for the role name
        sqlx::query(
            "INSERT INTO acl_rules (kind, subject, domain, resource, action)
             VALUES (?1, ?2, ?3, ?4, '')",
        )
        .bind(KIND_GROUPING)
        .bind(subject)
        .bind(domain)
        .bind(role)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
