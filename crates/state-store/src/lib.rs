//! SQLite persistence for the session broker: session records, command log,
//! and the asset/account/gateway directory.

mod db;
mod directory;
mod error;
mod session;

pub mod test_support;

pub use db::{display_server_db_path, migrate_server, server_db, server_db_from_path};
pub use directory::{fetch_account_by_id, fetch_asset_by_id, fetch_gateway_by_id};
pub use error::{DbError, DbResult};
pub use session::{
    AssetOption, SessionFilter, count_online_by_session_id, fetch_online_session,
    insert_session_cmd, list_asset_options, list_client_ips, list_online_sessions,
    list_session_cmds, list_sessions, mark_session_offline, upsert_session,
};
