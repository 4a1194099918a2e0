// Chat history persistence: one thread per buyer, messages kept per thread

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{ChatMessage, ChatRole};
use crate::db::parse_timestamp;

pub fn save_message(conn: &Connection, thread_id: &str, message: &ChatMessage) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_messages (thread_id, role, content, created_at, upstream_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            thread_id,
            message.role.as_str(),
            message.content,
            message.created_at.to_rfc3339(),
            message.upstream_id,
        ],
    )?;
    Ok(())
}

/// Store the assistant replies from an upstream listing that are not stored
/// yet, oldest first. Replies are matched by upstream id, so two replies with
/// the same text are both kept. Returns how many were added.
pub fn save_new_replies(conn: &Connection, thread_id: &str, messages: &[ChatMessage]) -> Result<usize> {
    let mut added = 0;
    for message in messages.iter().filter(|m| m.role == ChatRole::Assistant) {
        let Some(upstream_id) = message.upstream_id.as_deref() else {
            continue;
        };

        let stored: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM chat_messages WHERE thread_id = ?1 AND upstream_id = ?2)",
            params![thread_id, upstream_id],
            |row| row.get(0),
        )?;
        if !stored {
            save_message(conn, thread_id, message)?;
            added += 1;
        }
    }
    Ok(added)
}

/// Stored messages for a thread, oldest first
pub fn history(conn: &Connection, thread_id: &str) -> Result<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(
        "SELECT role, content, created_at, upstream_id FROM chat_messages
         WHERE thread_id = ?1
         ORDER BY id",
    )?;

    let messages = stmt
        .query_map(params![thread_id], |row| {
            let role: String = row.get(0)?;
            let created_at: String = row.get(2)?;
            Ok(ChatMessage {
                role: ChatRole::parse(&role).unwrap_or(ChatRole::Assistant),
                content: row.get(1)?,
                created_at: parse_timestamp(&created_at, 2)?,
                upstream_id: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(messages)
}

/// Remember which assistant thread a buyer is using (replaces any earlier one)
pub fn assign_thread(conn: &Connection, buyer_id: &str, thread_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_threads (buyer_id, thread_id, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(buyer_id) DO UPDATE SET thread_id = excluded.thread_id,
                                             created_at = excluded.created_at",
        params![buyer_id, thread_id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn thread_for_buyer(conn: &Connection, buyer_id: &str) -> Result<Option<String>> {
    let thread = conn
        .query_row(
            "SELECT thread_id FROM chat_threads WHERE buyer_id = ?1",
            params![buyer_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(thread)
}
