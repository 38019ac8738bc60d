//! Asset, account, and gateway directory lookups.

use sqlx::{Row, SqlitePool};
use tg_types::{AccessAuth, Account, Asset, Gateway};

use crate::{DbError, DbResult};

pub async fn fetch_asset_by_id(pool: &SqlitePool, id: i64) -> DbResult<Option<Asset>> {
    let Some(row) = sqlx::query("SELECT id, name, ip, gateway_id, access_auth FROM assets WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };

    let access_auth = match row.get::<Option<String>, _>("access_auth") {
        Some(raw) if !raw.is_empty() => Some(serde_json::from_str::<AccessAuth>(&raw).map_err(|source| {
            DbError::JsonDecode {
                context: format!("assets.access_auth (id {id})"),
                source,
            }
        })?),
        _ => None,
    };

    Ok(Some(Asset {
        id: row.get("id"),
        name: row.get("name"),
        ip: row.get("ip"),
        gateway_id: row.get("gateway_id"),
        access_auth,
    }))
}

pub async fn fetch_account_by_id(pool: &SqlitePool, id: i64) -> DbResult<Option<Account>> {
    let row = sqlx::query("SELECT id, name, account, password FROM accounts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| Account {
        id: r.get("id"),
        name: r.get("name"),
        account: r.get("account"),
        password: r.get("password"),
    }))
}

pub async fn fetch_gateway_by_id(pool: &SqlitePool, id: i64) -> DbResult<Option<Gateway>> {
    let row = sqlx::query("SELECT id, name, host, port, account, password FROM gateways WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| Gateway {
        id: r.get("id"),
        name: r.get("name"),
        host: r.get("host"),
        port: r.get("port"),
        account: r.get("account"),
        password: r.get("password"),
    }))
}
