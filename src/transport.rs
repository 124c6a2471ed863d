//! Transport boundary. Connection establishment to the upstream is an
//! external collaborator excluded from this crate's scope (§1), so the core
//! depends only on `CopyDataTransport`; the CLI binary wires a concrete
//! libpq-backed implementation into it.

use std::ffi::{CStr, CString};
use std::ptr;

use libpq_sys::*;

use crate::errors::{ReplicationError, ReplicationResult};

/// The minimal surface the apply loop needs from a physical connection:
/// pull one copy-data row (blocking), push one row (for feedback), and
/// flush. Kept deliberately narrow — session negotiation, slot creation,
/// and START_REPLICATION command construction live in the CLI binary that
/// owns a concrete transport, not in this trait.
#[async_trait::async_trait]
pub trait CopyDataTransport: Send + Sync {
    async fn recv(&self) -> ReplicationResult<Option<Vec<u8>>>;
    async fn send(&self, data: &[u8]) -> ReplicationResult<()>;
    async fn flush(&self) -> ReplicationResult<()>;
}

/// A safe wrapper around libpq's `PGconn`, trimmed to the replication
/// operations the CLI binary needs: connect, start replication via a raw
/// `exec`, and pump copy-data in both directions.
pub struct PgConnection {
    conn: *mut PGconn,
}

// libpq connections are not implicitly thread-safe, but this crate only
// ever drives one from a single task at a time via `spawn_blocking`-style
// isolation in the CLI binary; the apply core itself never touches `PGconn`
// directly.
unsafe impl Send for PgConnection {}
unsafe impl Sync for PgConnection {}

impl PgConnection {
    pub fn connect(conninfo: &str) -> ReplicationResult<Self> {
        let c_conninfo = CString::new(conninfo)
            .map_err(|e| ReplicationError::connection(e.to_string()))?;
        let conn = unsafe { PQconnectdb(c_conninfo.as_ptr()) };

        if conn.is_null() {
            return Err(ReplicationError::connection(
                "failed to allocate connection object",
            ));
        }

        let status = unsafe { PQstatus(conn) };
        if status != ConnStatusType::CONNECTION_OK {
            let message = Self::error_message(conn).unwrap_or_else(|| "unknown error".into());
            unsafe { PQfinish(conn) };
            return Err(ReplicationError::connection(message));
        }

        Ok(Self { conn })
    }

    pub fn start_replication(&self, command: &str) -> ReplicationResult<()> {
        let c_query = CString::new(command)
            .map_err(|e| ReplicationError::connection(e.to_string()))?;
        let result = unsafe { PQexec(self.conn, c_query.as_ptr()) };
        if result.is_null() {
            return Err(ReplicationError::connection(
                Self::error_message(self.conn).unwrap_or_else(|| "unknown error".into()),
            ));
        }
        let status = unsafe { PQresultStatus(result) };
        unsafe { PQclear(result) };
        if status != ExecStatusType::PGRES_COPY_BOTH {
            return Err(ReplicationError::connection(
                "server did not enter COPY BOTH mode for replication",
            ));
        }
        Ok(())
    }

    fn error_message(conn: *const PGconn) -> Option<String> {
        unsafe {
            let ptr = PQerrorMessage(conn);
            if ptr.is_null() {
                None
            } else {
                Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        }
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if !self.conn.is_null() {
            unsafe { PQfinish(self.conn) };
        }
    }
}

#[async_trait::async_trait]
impl CopyDataTransport for PgConnection {
    async fn recv(&self) -> ReplicationResult<Option<Vec<u8>>> {
        let mut buffer: *mut std::os::raw::c_char = ptr::null_mut();
        let len = unsafe { PQgetCopyData(self.conn, &mut buffer, 0) };
        match len {
            -2 => Err(ReplicationError::connection(
                Self::error_message(self.conn).unwrap_or_else(|| "unknown error".into()),
            )),
            -1 => Err(ReplicationError::TransportClosed),
            0 => Ok(None),
            len => {
                if buffer.is_null() {
                    return Err(ReplicationError::connection("received null copy buffer"));
                }
                let data =
                    unsafe { std::slice::from_raw_parts(buffer as *const u8, len as usize) }
                        .to_vec();
                unsafe { PQfreemem(buffer as *mut std::os::raw::c_void) };
                Ok(Some(data))
            }
        }
    }

    async fn send(&self, data: &[u8]) -> ReplicationResult<()> {
        let result = unsafe {
            PQputCopyData(
                self.conn,
                data.as_ptr() as *const std::os::raw::c_char,
                data.len() as i32,
            )
        };
        if result != 1 {
            return Err(ReplicationError::connection(
                Self::error_message(self.conn).unwrap_or_else(|| "failed to send copy data".into()),
            ));
        }
        Ok(())
    }

    async fn flush(&self) -> ReplicationResult<()> {
        let result = unsafe { PQflush(self.conn) };
        if result != 0 {
            return Err(ReplicationError::connection("failed to flush connection"));
        }
        Ok(())
    }
}
