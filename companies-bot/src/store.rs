//! SQLite persistence for members, companies and creation requests.
//!
//! Every public method runs in its own short transaction. Name and tag
//! uniqueness is checked across both committed companies and pending
//! requests inside that transaction, so a check and its insert can't be
//! split by another writer.

use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use crate::error::{Error, Result};
use crate::model::{ChannelId, Company, CompanyRequest, Member, MessageId, NewCompany, RoleId, UserId};

pub struct Store {
    db: Mutex<Connection>,
}

// Snowflakes fit in 63 bits; SQLite integers are signed.
fn sql_id(id: u64) -> i64 {
    id as i64
}

fn company_from_row(row: &Row<'_>) -> rusqlite::Result<Company> {
    Ok(Company {
        name: row.get(0)?,
        tag: row.get(1)?,
        category: ChannelId(row.get::<_, i64>(2)? as u64),
        role: RoleId(row.get::<_, i64>(3)? as u64),
        faction: row.get(4)?,
        balance: row.get(5)?,
    })
}

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<CompanyRequest> {
    Ok(CompanyRequest {
        requester: UserId(row.get::<_, i64>(0)? as u64),
        name: row.get(1)?,
        tag: row.get(2)?,
        survey_channel: ChannelId(row.get::<_, i64>(3)? as u64),
        approval_message: row.get::<_, Option<i64>>(4)?.map(|m| MessageId(m as u64)),
        created_at: row.get(5)?,
    })
}

const COMPANY_COLUMNS: &str = "name, tag, category_id, role_id, faction, balance";
const REQUEST_COLUMNS: &str = "member_id, name, tag, survey_channel_id, approve_message_id, created_at";

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { db: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let store = Self {
            db: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let db = self.db.lock();
        db.execute_batch("PRAGMA foreign_keys=ON;")?;
        db.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS companies (
                name        TEXT PRIMARY KEY COLLATE NOCASE,
                tag         TEXT NOT NULL UNIQUE COLLATE NOCASE,
                category_id INTEGER NOT NULL,
                role_id     INTEGER NOT NULL,
                faction     TEXT,
                balance     REAL NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS members (
                member_id         INTEGER PRIMARY KEY,
                balance           REAL NOT NULL DEFAULT 0,
                blacklisted       INTEGER NOT NULL DEFAULT 0,
                company_name      TEXT REFERENCES companies(name)
                                      ON DELETE SET NULL ON UPDATE CASCADE,
                company_donations REAL NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_members_company ON members(company_name);

            CREATE TABLE IF NOT EXISTS requests (
                member_id          INTEGER PRIMARY KEY,
                name               TEXT NOT NULL COLLATE NOCASE,
                tag                TEXT NOT NULL COLLATE NOCASE,
                survey_channel_id  INTEGER NOT NULL,
                approve_message_id INTEGER,
                created_at         TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_requests_message ON requests(approve_message_id);
            CREATE INDEX IF NOT EXISTS idx_requests_channel ON requests(survey_channel_id);
            ",
        )?;
        Ok(())
    }

    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Members ────────────────────────────────────────────────────────

    pub fn member(&self, user: UserId) -> Result<Option<Member>> {
        let db = self.db.lock();
        let member = db
            .query_row(
                "SELECT member_id, balance, blacklisted, company_donations, company_name
                 FROM members WHERE member_id = ?1",
                params![sql_id(user.0)],
                |row| {
                    Ok(Member {
                        id: UserId(row.get::<_, i64>(0)? as u64),
                        balance: row.get(1)?,
                        blacklisted: row.get(2)?,
                        company_donations: row.get(3)?,
                        company: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(member)
    }

    /// Name of the company `user` belongs to, if any.
    pub fn company_of(&self, user: UserId) -> Result<Option<String>> {
        Ok(self.member(user)?.and_then(|m| m.company))
    }

    /// Point `user` at `company`, creating the member row if needed.
    pub fn join_company(&self, user: UserId, company: &str) -> Result<()> {
        self.write(|tx| {
            let name = canonical_company_name(tx, company)?
                .ok_or_else(|| Error::CompanyNotFound(company.to_string()))?;
            link_member(tx, user, &name)
        })
    }

    pub fn leave_company(&self, user: UserId) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "UPDATE members SET company_name = NULL WHERE member_id = ?1",
                params![sql_id(user.0)],
            )?;
            Ok(())
        })
    }

    pub fn reset_donations(&self, user: UserId) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "UPDATE members SET company_donations = 0 WHERE member_id = ?1",
                params![sql_id(user.0)],
            )?;
            Ok(())
        })
    }

    /// Test and maintenance hook: record a donation to the member's company.
    pub fn add_donation(&self, user: UserId, amount: f64) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "INSERT OR IGNORE INTO members (member_id) VALUES (?1)",
                params![sql_id(user.0)],
            )?;
            tx.execute(
                "UPDATE members SET company_donations = company_donations + ?2 WHERE member_id = ?1",
                params![sql_id(user.0), amount],
            )?;
            Ok(())
        })
    }

    /// Remove the member row entirely. Returns whether a row existed.
    pub fn delete_member(&self, user: UserId) -> Result<bool> {
        self.write(|tx| {
            let n = tx.execute(
                "DELETE FROM members WHERE member_id = ?1",
                params![sql_id(user.0)],
            )?;
            Ok(n > 0)
        })
    }

    // ── Companies ──────────────────────────────────────────────────────

    pub fn company(&self, name: &str) -> Result<Option<Company>> {
        let db = self.db.lock();
        let company = db
            .query_row(
                &format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE name = ?1"),
                params![name],
                company_from_row,
            )
            .optional()?;
        Ok(company)
    }

    pub fn list_companies(&self) -> Result<Vec<Company>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(&format!("SELECT {COMPANY_COLUMNS} FROM companies ORDER BY name"))?;
        let rows = stmt
            .query_map([], company_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Ids of every member of `company`.
    pub fn company_members(&self, company: &str) -> Result<Vec<UserId>> {
        let db = self.db.lock();
        let name = canonical_company_name(&db, company)?
            .ok_or_else(|| Error::CompanyNotFound(company.to_string()))?;
        let mut stmt = db.prepare("SELECT member_id FROM members WHERE company_name = ?1 ORDER BY member_id")?;
        let ids = stmt
            .query_map(params![name], |row| Ok(UserId(row.get::<_, i64>(0)? as u64)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Whether `name` is used by a company, or (optionally) a pending request.
    pub fn name_taken(&self, name: &str, include_requests: bool) -> Result<bool> {
        let db = self.db.lock();
        let in_companies = exists(&db, "SELECT 1 FROM companies WHERE name = ?1", name)?;
        Ok(in_companies || (include_requests && exists(&db, "SELECT 1 FROM requests WHERE name = ?1", name)?))
    }

    /// Whether `tag` is used by a company or a pending request.
    pub fn tag_taken(&self, tag: &str) -> Result<bool> {
        let db = self.db.lock();
        Ok(exists(&db, "SELECT 1 FROM companies WHERE tag = ?1", tag)?
            || exists(&db, "SELECT 1 FROM requests WHERE tag = ?1", tag)?)
    }

    /// Commit an approved company and link its governor. Fails with
    /// `DuplicateName`/`DuplicateTag` when another company or another
    /// requester's request already uses the name or tag.
    pub fn create_company(&self, new: &NewCompany) -> Result<Company> {
        self.write(|tx| {
            let others = sql_id(new.governor.0);
            let name_used = exists(tx, "SELECT 1 FROM companies WHERE name = ?1", &new.name)?
                || tx
                    .query_row(
                        "SELECT 1 FROM requests WHERE name = ?1 AND member_id != ?2",
                        params![new.name, others],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
            if name_used {
                return Err(Error::DuplicateName(new.name.clone()));
            }
            let tag_used = exists(tx, "SELECT 1 FROM companies WHERE tag = ?1", &new.tag)?
                || tx
                    .query_row(
                        "SELECT 1 FROM requests WHERE tag = ?1 AND member_id != ?2",
                        params![new.tag, others],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
            if tag_used {
                return Err(Error::DuplicateTag(new.tag.clone()));
            }

            let linked: Option<String> = tx
                .query_row(
                    "SELECT company_name FROM members WHERE member_id = ?1",
                    params![others],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            if let Some(current) = linked {
                return Err(Error::AlreadyInCompany(current));
            }

            tx.execute(
                "INSERT INTO companies (name, tag, category_id, role_id) VALUES (?1, ?2, ?3, ?4)",
                params![new.name, new.tag, sql_id(new.category.0), sql_id(new.role.0)],
            )?;
            link_member(tx, new.governor, &new.name)?;

            Ok(Company {
                name: new.name.clone(),
                tag: new.tag.clone(),
                category: new.category,
                role: new.role,
                faction: None,
                balance: 0.0,
            })
        })
    }

    /// Delete the company row. Member rows survive with their FK cleared.
    pub fn delete_company(&self, name: &str) -> Result<bool> {
        self.write(|tx| {
            let n = tx.execute("DELETE FROM companies WHERE name = ?1", params![name])?;
            Ok(n > 0)
        })
    }

    pub fn set_faction(&self, company: &str, faction: Option<&str>) -> Result<()> {
        self.write(|tx| {
            let n = tx.execute(
                "UPDATE companies SET faction = ?2 WHERE name = ?1",
                params![company, faction],
            )?;
            if n == 0 {
                return Err(Error::CompanyNotFound(company.to_string()));
            }
            Ok(())
        })
    }

    // ── Requests ───────────────────────────────────────────────────────

    /// Record a new creation request. One per requester; name and tag must
    /// be unused by companies and other requests.
    pub fn create_request(
        &self,
        requester: UserId,
        name: &str,
        tag: &str,
        survey_channel: ChannelId,
    ) -> Result<CompanyRequest> {
        self.write(|tx| {
            let id = sql_id(requester.0);
            let pending = tx
                .query_row("SELECT 1 FROM requests WHERE member_id = ?1", params![id], |_| Ok(()))
                .optional()?;
            if pending.is_some() {
                return Err(Error::DuplicateRequest(requester.to_string()));
            }
            if exists(tx, "SELECT 1 FROM companies WHERE name = ?1", name)?
                || exists(tx, "SELECT 1 FROM requests WHERE name = ?1", name)?
            {
                return Err(Error::DuplicateName(name.to_string()));
            }
            if exists(tx, "SELECT 1 FROM companies WHERE tag = ?1", tag)?
                || exists(tx, "SELECT 1 FROM requests WHERE tag = ?1", tag)?
            {
                return Err(Error::DuplicateTag(tag.to_string()));
            }

            let created_at = Utc::now().to_rfc3339();
            tx.execute(
                "INSERT INTO requests (member_id, name, tag, survey_channel_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, name, tag, sql_id(survey_channel.0), created_at],
            )?;
            Ok(CompanyRequest {
                requester,
                name: name.to_string(),
                tag: tag.to_string(),
                survey_channel,
                approval_message: None,
                created_at,
            })
        })
    }

    pub fn request_for(&self, requester: UserId) -> Result<Option<CompanyRequest>> {
        self.request_where("member_id", sql_id(requester.0))
    }

    pub fn request_by_message(&self, message: MessageId) -> Result<Option<CompanyRequest>> {
        self.request_where("approve_message_id", sql_id(message.0))
    }

    pub fn request_by_channel(&self, channel: ChannelId) -> Result<Option<CompanyRequest>> {
        self.request_where("survey_channel_id", sql_id(channel.0))
    }

    fn request_where(&self, column: &str, value: i64) -> Result<Option<CompanyRequest>> {
        let db = self.db.lock();
        let req = db
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE {column} = ?1"),
                params![value],
                request_from_row,
            )
            .optional()?;
        Ok(req)
    }

    pub fn set_approval_message(&self, requester: UserId, message: MessageId) -> Result<()> {
        self.write(|tx| {
            let n = tx.execute(
                "UPDATE requests SET approve_message_id = ?2 WHERE member_id = ?1",
                params![sql_id(requester.0), sql_id(message.0)],
            )?;
            if n == 0 {
                return Err(Error::RequestNotFound(requester.to_string()));
            }
            Ok(())
        })
    }

    /// Approval messages still waiting for a decision.
    pub fn pending_approval_messages(&self) -> Result<Vec<MessageId>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT approve_message_id FROM requests WHERE approve_message_id IS NOT NULL",
        )?;
        let ids = stmt
            .query_map([], |row| Ok(MessageId(row.get::<_, i64>(0)? as u64)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn delete_request(&self, requester: UserId) -> Result<bool> {
        self.write(|tx| {
            let n = tx.execute("DELETE FROM requests WHERE member_id = ?1", params![sql_id(requester.0)])?;
            Ok(n > 0)
        })
    }

    /// Delete the request whose survey runs in `channel`, returning its requester.
    pub fn delete_request_by_channel(&self, channel: ChannelId) -> Result<Option<UserId>> {
        self.write(|tx| {
            let requester: Option<i64> = tx
                .query_row(
                    "SELECT member_id FROM requests WHERE survey_channel_id = ?1",
                    params![sql_id(channel.0)],
                    |r| r.get(0),
                )
                .optional()?;
            if let Some(id) = requester {
                tx.execute("DELETE FROM requests WHERE member_id = ?1", params![id])?;
            }
            Ok(requester.map(|id| UserId(id as u64)))
        })
    }
}

fn exists(conn: &Connection, sql: &str, value: &str) -> rusqlite::Result<bool> {
    Ok(conn.query_row(sql, params![value], |_| Ok(())).optional()?.is_some())
}

fn canonical_company_name(conn: &Connection, name: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT name FROM companies WHERE name = ?1", params![name], |r| r.get(0))
        .optional()
}

fn link_member(conn: &Connection, user: UserId, company: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO members (member_id) VALUES (?1)",
        params![sql_id(user.0)],
    )?;
    conn.execute(
        "UPDATE members SET company_name = ?2 WHERE member_id = ?1",
        params![sql_id(user.0), company],
    )?;
    Ok(())
}
