//! Storage Layer - pooled SQLite access
//!
//! System of record is SQLite with tables:
//! - str(id, osz, csz, cbu, cbj, sz)
//! - timeline_raw(tp, ft, ac, pid, data64, id_str)
//! - timeline(id, tp, ft, ac, pid, data64, id_str, oln_u, oln_j, oln_utp, oln_jtp)

pub mod location;
pub mod pool;
pub mod schema;
pub mod sql;

pub use location::{StoreLocation, StoreType};
pub use pool::{PooledConnection, SqlPool, POOL_SIZE};
pub use sql::{bind_multi_i64, exec, query_numeric};
