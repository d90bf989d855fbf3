//! Redis driver, feature-gated behind `"redis"`.
//!
//! Counters use Redis's native integer strings so `INCRBY` works on them
//! server-side; `inc` is atomic on the server regardless of client count.

use parking_lot::Mutex;

use metafs_kv::KvStore;
use metafs_types::{KvCode, Result, Status};

pub struct RedisKv {
    conn: Mutex<redis::Connection>,
}

fn failed(code: metafs_types::status_code_t, op: &str, e: redis::RedisError) -> Status {
    Status::with_message(code, format!("redis {}: {}", op, e))
}

impl RedisKv {
    /// Connect to a Redis instance, e.g. `redis://127.0.0.1/`.
    pub fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| failed(KvCode::OPEN_FAILED, "open", e))?;
        let conn = client
            .get_connection()
            .map_err(|e| failed(KvCode::OPEN_FAILED, "connect", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KvStore for RedisKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.lock();
        redis::cmd("GET")
            .arg(key)
            .query(&mut *conn)
            .map_err(|e| failed(KvCode::GET_FAILED, "GET", e))
    }

    fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.conn.lock();
        redis::cmd("GET")
            .arg(key)
            .query(&mut *conn)
            .map_err(|e| failed(KvCode::BAD_VALUE, "GET(u64)", e))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn.lock();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query::<()>(&mut *conn)
            .map_err(|e| failed(KvCode::PUT_FAILED, "SET", e))
    }

    fn put_u64(&self, key: &str, value: u64) -> Result<()> {
        let mut conn = self.conn.lock();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query::<()>(&mut *conn)
            .map_err(|e| failed(KvCode::PUT_FAILED, "SET(u64)", e))
    }

    fn inc(&self, key: &str, delta: u64) -> Result<u64> {
        let mut conn = self.conn.lock();
        redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query(&mut *conn)
            .map_err(|e| failed(KvCode::INC_FAILED, "INCRBY", e))
    }

    fn erase(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        redis::cmd("DEL")
            .arg(key)
            .query::<()>(&mut *conn)
            .map_err(|e| failed(KvCode::ERASE_FAILED, "DEL", e))
    }
}
