use anyhow::Result;
use rusqlite::{Row, params};

use parley_types::models::Lead;

use crate::models::NewLead;
use crate::queries::{OptionalExt, ts_col};
use crate::{Database, format_ts};

const LEAD_COLUMNS: &str = "id, name, email, company, phone, message, source, enrichment, created_at";

impl Database {
    pub fn insert_lead(&self, new: &NewLead) -> Result<Lead> {
        self.with_conn_mut(|conn| {
            let now = crate::now();
            conn.execute(
                "INSERT INTO leads (id, name, email, company, phone, message, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    new.id,
                    new.name,
                    new.email,
                    new.company,
                    new.phone,
                    new.message,
                    new.source,
                    format_ts(&now),
                ],
            )?;

            Ok(Lead {
                id: new.id.clone(),
                name: new.name.clone(),
                email: new.email.clone(),
                company: new.company.clone(),
                phone: new.phone.clone(),
                message: new.message.clone(),
                source: new.source.clone(),
                enrichment: None,
                created_at: now,
            })
        })
    }

    pub fn get_lead(&self, id: &str) -> Result<Option<Lead>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"))?;
            stmt.query_row([id], lead_from_row).optional()
        })
    }

    /// Oldest first, the order exports are written in.
    pub fn list_leads(&self) -> Result<Vec<Lead>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LEAD_COLUMNS} FROM leads ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map([], lead_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false when the lead does not exist.
    pub fn set_lead_enrichment(&self, id: &str, enrichment: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE leads SET enrichment = ?1 WHERE id = ?2",
                params![enrichment, id],
            )?;
            Ok(changed > 0)
        })
    }
}

fn lead_from_row(row: &Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        company: row.get(3)?,
        phone: row.get(4)?,
        message: row.get(5)?,
        source: row.get(6)?,
        enrichment: row.get(7)?,
        created_at: ts_col(row, 8)?,
    })
}
