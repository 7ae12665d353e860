//! Persistence for `state.set`/`state.get`: a `(scope, key) -> value` table
//! scoped per workspace, last-writer-wins.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Window,
    Workspace,
    Global,
}

impl Scope {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "window" => Some(Scope::Window),
            "workspace" => Some(Scope::Workspace),
            "global" => Some(Scope::Global),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Window => "window",
            Scope::Workspace => "workspace",
            Scope::Global => "global",
        }
    }
}

pub async fn set(
    state: &crate::AppState,
    workspace_id: &str,
    scope: Scope,
    key: &str,
    value: Value,
) -> anyhow::Result<()> {
    let workspace_id = workspace_id.to_string();
    let scope_str = scope.as_str().to_string();
    let key = key.to_string();
    let now = Utc::now().timestamp();
    state
        .db_rw
        .call(move |conn| {
            let value_json = serde_json::to_string(&value)?;
            conn.execute(
                "INSERT INTO state_entry (workspace_id, scope, key, value_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(workspace_id, scope, key) DO UPDATE SET
                    value_json = excluded.value_json,
                    updated_at = excluded.updated_at",
                params![workspace_id, scope_str, key, value_json, now],
            )?;
            Ok(())
        })
        .await
        .map_err(|err| anyhow::anyhow!("state.set failed: {err}"))
}

pub async fn get(
    state: &crate::AppState,
    workspace_id: &str,
    scope: Scope,
    key: &str,
) -> anyhow::Result<Option<Value>> {
    let workspace_id = workspace_id.to_string();
    let scope_str = scope.as_str().to_string();
    let key = key.to_string();
    state
        .db_ro
        .call(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value_json FROM state_entry WHERE workspace_id = ?1 AND scope = ?2 AND key = ?3",
                    params![workspace_id, scope_str, key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(raw)
        })
        .await
        .map_err(|err| anyhow::anyhow!("state.get failed: {err}"))?
        .map(|raw| serde_json::from_str(&raw).map_err(anyhow::Error::from))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_round_trips() {
        assert_eq!(Scope::parse("workspace"), Some(Scope::Workspace));
        assert_eq!(Scope::parse("bogus"), None);
        assert_eq!(Scope::Global.as_str(), "global");
    }
}
