use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use rusqlite::params;
use serde::Serialize;

use super::Database;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserMemory {
    pub memory_id: String,
    pub user_id: String,
    pub memory: String,
    pub created_at: String,
}

/// Facts an agent has chosen to remember about a user, shared across agents.
#[derive(Clone)]
pub struct MemoryStore {
    db: Arc<Database>,
}

impl MemoryStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        db.lock()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS user_memories (
                memory_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                memory TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_user_memories_user ON user_memories(user_id);",
        )?;
        Ok(Self { db })
    }

    pub fn add(&self, user_id: &str, memory: &str) -> Result<UserMemory> {
        let entry = UserMemory {
            memory_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            memory: memory.trim().to_string(),
            created_at: Utc::now().to_rfc3339(),
        };
        self.db.lock()?.execute(
            "INSERT INTO user_memories (memory_id, user_id, memory, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![entry.memory_id, entry.user_id, entry.memory, entry.created_at],
        )?;
        Ok(entry)
    }

    pub fn list(&self, user_id: &str) -> Result<Vec<UserMemory>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT memory_id, user_id, memory, created_at FROM user_memories
             WHERE user_id = ?1 ORDER BY created_at, rowid",
        )?;
        let memories = stmt
            .query_map(params![user_id], |row| {
                Ok(UserMemory {
                    memory_id: row.get(0)?,
                    user_id: row.get(1)?,
                    memory: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(memories)
    }

    /// Delete one memory. Returns false when it does not exist for this user.
    pub fn delete(&self, user_id: &str, memory_id: &str) -> Result<bool> {
        let n = self.db.lock()?.execute(
            "DELETE FROM user_memories WHERE user_id = ?1 AND memory_id = ?2",
            params![user_id, memory_id],
        )?;
        Ok(n > 0)
    }

    /// Delete all memories of a user, returning how many were removed.
    pub fn clear(&self, user_id: &str) -> Result<usize> {
        let n = self.db.lock()?.execute(
            "DELETE FROM user_memories WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memories_are_per_user() {
        let store = MemoryStore::new(Arc::new(Database::open_in_memory().unwrap())).unwrap();
        let first = store.add("ada", "Prefers Rust").unwrap();
        store.add("ada", " Follows HN daily ").unwrap();
        store.add("bob", "Likes Go").unwrap();

        let ada = store.list("ada").unwrap();
        assert_eq!(ada.len(), 2);
        assert_eq!(ada[0], first);
        assert_eq!(ada[1].memory, "Follows HN daily");

        assert!(!store.delete("bob", &first.memory_id).unwrap());
        assert!(store.delete("ada", &first.memory_id).unwrap());
        assert_eq!(store.list("ada").unwrap().len(), 1);

        assert_eq!(store.clear("ada").unwrap(), 1);
        assert!(store.list("ada").unwrap().is_empty());
        assert_eq!(store.list("bob").unwrap().len(), 1);
    }
}
