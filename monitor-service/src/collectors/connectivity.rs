//! Connectivity probe.

use common::models::ConnectivityFact;

use super::CollectContext;
use crate::executor::ExecResult;

pub(crate) const PROBE_SQL: &str = "SELECT @@SERVERNAME AS server_name, \
     CAST(SERVERPROPERTY('ProductVersion') AS nvarchar(128)) AS product_version";

/// Runs the probe query. Any error means the server is unreachable for
/// this tick; the caller decides how to report it.
pub async fn probe(ctx: CollectContext<'_>) -> ExecResult<ConnectivityFact> {
    let rows = ctx
        .executor
        .query(ctx.target, PROBE_SQL, &[], ctx.timeout)
        .await?;
    let row = rows.first();
    Ok(ConnectivityFact {
        is_connected: true,
        server_name: row.and_then(|r| r.text("server_name")),
        product_version: row.and_then(|r| r.text("product_version")),
        error: None,
    })
}
