// Roster export - one CSV per realtor with buyers and outstanding invites

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::entities::{realtor_roster, RealtorRoster};

#[derive(Debug, Serialize)]
struct RosterRow<'a> {
    kind: &'static str,
    name: String,
    email: &'a str,
    invite_code: &'a str,
    current_step: Option<u8>,
    step_title: &'static str,
    percent_complete: Option<u8>,
    created_at: String,
}

fn roster_rows(roster: &RealtorRoster) -> Vec<RosterRow<'_>> {
    let buyers = roster.buyers.iter().map(|buyer| {
        let progress = buyer.progress();
        RosterRow {
            kind: "buyer",
            name: buyer.full_name(),
            email: &buyer.email,
            invite_code: &buyer.invite_code,
            current_step: Some(progress.current_step),
            step_title: progress.current_title,
            percent_complete: Some(progress.percent),
            created_at: buyer.created_at.to_rfc3339(),
        }
    });

    let invites = roster.pending_invites.iter().map(|invite| RosterRow {
        kind: "pending_invite",
        name: String::new(),
        email: &invite.recipient_email,
        invite_code: &invite.code,
        current_step: None,
        step_title: "",
        percent_complete: None,
        created_at: invite.created_at.to_rfc3339(),
    });

    buyers.chain(invites).collect()
}

/// Write a realtor's roster as CSV. Returns the number of data rows.
pub fn write_roster_csv<W: Write>(conn: &Connection, realtor_id: &str, writer: W) -> Result<usize> {
    let roster = realtor_roster(conn, realtor_id)?;
    let rows = roster_rows(&roster);

    let mut wtr = csv::Writer::from_writer(writer);
    for row in &rows {
        wtr.serialize(row).context("Failed to write roster row")?;
    }
    wtr.flush()?;

    Ok(rows.len())
}

pub fn export_roster_csv(conn: &Connection, realtor_id: &str, path: &Path) -> Result<usize> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let count = write_roster_csv(conn, realtor_id, file)?;

    info!(realtor_id, rows = count, path = %path.display(), "roster exported");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::{complete_buyer_step, create_realtor, insert_buyer, BuyerAccount, BuyerStep};
    use crate::invites::InviteRegistry;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_roster_csv_lists_buyers_then_invites() {
        let conn = test_conn();
        let realtor = create_realtor(&conn, "Pat Agent", "pat@agency.com").unwrap();

        let buyer = BuyerAccount::new(
            "Jane".to_string(),
            "Doe".to_string(),
            "jane@example.com".to_string(),
            "ABCD1234".to_string(),
            realtor.id.clone(),
        );
        insert_buyer(&conn, &buyer).unwrap();
        complete_buyer_step(&conn, &buyer.id, BuyerStep::PreApproval).unwrap();

        let registry = InviteRegistry::new(&conn);
        let invite = registry.create_invite_code("next@buyer.com", &realtor.id).unwrap();

        let mut out = Vec::new();
        let count = write_roster_csv(&conn, &realtor.id, &mut out).unwrap();
        assert_eq!(count, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("kind,name,email,invite_code"));
        assert!(lines[1].starts_with("buyer,Jane Doe,jane@example.com,ABCD1234,2,Find a Realtor,11,"));
        assert!(lines[2].starts_with(&format!("pending_invite,,next@buyer.com,{},,,,", invite.code)));
    }

    #[test]
    fn test_export_to_file_and_unknown_realtor() {
        let conn = test_conn();
        let realtor = create_realtor(&conn, "Pat Agent", "pat@agency.com").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.csv");

        assert_eq!(export_roster_csv(&conn, &realtor.id, &path).unwrap(), 0);
        assert!(path.exists());

        assert!(export_roster_csv(&conn, "missing", &dir.path().join("x.csv")).is_err());
    }
}
