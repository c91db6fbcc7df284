use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::ledger::LedgerStore;
use crate::model::{
    IdCardData, InvoiceScan, Pharmacy, Product, ProductStatus, Role, ScanStatus, UserProfile,
};
use crate::reference::ReferenceData;
use crate::scans::{IdScanRepository, ScanRepository, ScanUpdate};

/// SQLite-backed store for scans, reference data and counters.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(db_path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scans (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                storage_path TEXT,
                status TEXT NOT NULL DEFAULT 'uploading',
                claimed_at DATETIME,
                pharmacy_id TEXT,
                rejection_reason TEXT,
                error_message TEXT,
                ai_response TEXT,
                points_earned INTEGER NOT NULL DEFAULT 0,
                products_found TEXT NOT NULL DEFAULT '[]',
                ncf TEXT,
                invoice_date TEXT,
                expires_at TEXT,
                sales_rep_rewards TEXT NOT NULL DEFAULT '{}',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                keywords TEXT NOT NULL DEFAULT '[]',
                line TEXT,
                commission REAL NOT NULL DEFAULT 0,
                points INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active'
            );

            CREATE TABLE IF NOT EXISTS pharmacies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                rep_assignments TEXT NOT NULL DEFAULT '{}',
                scan_count INTEGER NOT NULL DEFAULT 0,
                monthly_points INTEGER NOT NULL DEFAULT 0,
                lifetime_points INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                role TEXT NOT NULL DEFAULT 'clerk',
                pharmacy_id TEXT,
                assigned_pharmacies TEXT NOT NULL DEFAULT '[]',
                points INTEGER NOT NULL DEFAULT 0,
                scan_count INTEGER NOT NULL DEFAULT 0,
                monthly_sales INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS id_scans (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                storage_path TEXT,
                status TEXT NOT NULL DEFAULT 'uploading',
                claimed_at DATETIME,
                data TEXT,
                error_message TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_scans_ncf ON scans(ncf);
            CREATE INDEX IF NOT EXISTS idx_scans_user ON scans(user_id);
            CREATE INDEX IF NOT EXISTS idx_scans_status ON scans(status);
            CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);",
        )?;

        info!("Database initialized successfully");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    fn load_scan(conn: &Connection, scan_id: &str) -> Result<Option<InvoiceScan>, StoreError> {
        let row = conn
            .query_row(
                "SELECT id, user_id, storage_path, status, pharmacy_id, rejection_reason, error_message,
                        ai_response, points_earned, products_found, ncf, invoice_date, expires_at,
                        sales_rep_rewards
                 FROM scans WHERE id = ?1",
                params![scan_id],
                |row| {
                    Ok((
                        InvoiceScan {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            storage_path: row.get(2)?,
                            status: ScanStatus::Uploading,
                            pharmacy_id: row.get(4)?,
                            rejection_reason: row.get(5)?,
                            error_message: row.get(6)?,
                            ai_response: None,
                            points_earned: row.get(8)?,
                            products_found: Vec::new(),
                            ncf: row.get(10)?,
                            invoice_date: row.get(11)?,
                            expires_at: row.get(12)?,
                            sales_rep_rewards: BTreeMap::new(),
                        },
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, String>(13)?,
                    ))
                },
            )
            .optional()?;

        let Some((mut scan, status, ai_response, products_found, rewards)) = row else {
            return Ok(None);
        };
        scan.status = ScanStatus::parse(&status).unwrap_or(ScanStatus::Error);
        scan.ai_response = ai_response
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?;
        scan.products_found = serde_json::from_str(&products_found)?;
        scan.sales_rep_rewards = serde_json::from_str(&rewards)?;
        Ok(Some(scan))
    }

    fn bump(conn: &Connection, table: &'static str, id: &str, sql: &str, values: &[i64]) -> Result<(), StoreError> {
        let changed = match values {
            [a] => conn.execute(sql, params![a, id])?,
            [a, b] => conn.execute(sql, params![a, b, id])?,
            _ => conn.execute(sql, params![id])?,
        };
        if changed == 0 {
            return Err(StoreError::Missing {
                table,
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(UserProfile, String)> {
    Ok((
        UserProfile {
            id: row.get(0)?,
            role: Role::parse(&row.get::<_, String>(1)?),
            pharmacy_id: row.get(2)?,
            assigned_pharmacies: Vec::new(),
        },
        row.get(3)?,
    ))
}

fn finish_user((mut user, assigned): (UserProfile, String)) -> Result<UserProfile, StoreError> {
    user.assigned_pharmacies = serde_json::from_str(&assigned)?;
    Ok(user)
}

#[async_trait]
impl ReferenceData for SqliteStore {
    async fn products(&self) -> Result<Vec<Product>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, keywords, line, commission, points, status FROM products ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    Product {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        keywords: Vec::new(),
                        line: row.get(3)?,
                        commission: row.get(4)?,
                        points: row.get(5)?,
                        status: ProductStatus::parse(&row.get::<_, String>(6)?),
                    },
                    row.get::<_, String>(2)?,
                ))
            })?;
            let mut products = Vec::new();
            for row in rows {
                let (mut product, keywords) = row?;
                product.keywords = serde_json::from_str(&keywords)?;
                products.push(product);
            }
            Ok(products)
        })
    }

    async fn pharmacies(&self) -> Result<Vec<Pharmacy>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, rep_assignments FROM pharmacies ORDER BY name")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?;
            let mut pharmacies = Vec::new();
            for row in rows {
                let (id, name, assignments) = row?;
                let rep_assignments: HashMap<String, Vec<String>> = serde_json::from_str(&assignments)?;
                pharmacies.push(Pharmacy {
                    id,
                    name,
                    rep_assignments,
                });
            }
            Ok(pharmacies)
        })
    }

    async fn user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, role, pharmacy_id, assigned_pharmacies FROM users WHERE id = ?1",
                params![user_id],
                user_from_row,
            )
            .optional()?
            .map(finish_user)
            .transpose()
        })
    }

    async fn sales_reps_for(&self, pharmacy_id: &str) -> Result<Vec<UserProfile>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, role, pharmacy_id, assigned_pharmacies FROM users WHERE role = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![Role::SalesRep.as_str()], user_from_row)?;
            let mut reps = Vec::new();
            for row in rows {
                let rep = finish_user(row?)?;
                if rep.assigned_pharmacies.iter().any(|p| p == pharmacy_id) {
                    reps.push(rep);
                }
            }
            Ok(reps)
        })
    }
}

#[async_trait]
impl ScanRepository for SqliteStore {
    async fn scan(&self, scan_id: &str) -> Result<Option<InvoiceScan>, StoreError> {
        self.with_conn(|conn| Self::load_scan(conn, scan_id))
    }

    async fn claim_scan(&self, scan_id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE scans SET claimed_at = CURRENT_TIMESTAMP
                 WHERE id = ?1 AND status = 'uploaded' AND claimed_at IS NULL",
                params![scan_id],
            )?;
            Ok(changed == 1)
        })
    }

    async fn reserve_ncf(&self, scan_id: &str, ncf: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE scans SET ncf = ?1
                 WHERE id = ?2
                   AND NOT EXISTS (SELECT 1 FROM scans WHERE ncf = ?1 AND id <> ?2)",
                params![ncf, scan_id],
            )?;
            if changed == 1 {
                return Ok(true);
            }
            if Self::load_scan(conn, scan_id)?.is_none() {
                return Err(StoreError::ScanNotFound(scan_id.to_string()));
            }
            Ok(false)
        })
    }

    async fn write_scan(&self, scan_id: &str, update: &ScanUpdate) -> Result<(), StoreError> {
        let ai_response = update.ai_response.as_ref().map(serde_json::to_string).transpose()?;
        let processed = match &update.processed {
            Some(p) => Some((
                p,
                serde_json::to_string(&p.products_found)?,
                serde_json::to_string(&p.sales_rep_rewards)?,
            )),
            None => None,
        };

        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE scans SET
                    status = ?1,
                    rejection_reason = COALESCE(?2, rejection_reason),
                    error_message = COALESCE(?3, error_message),
                    ai_response = COALESCE(?4, ai_response),
                    -- an NCF reserved during validation is kept only by processed scans
                    ncf = CASE WHEN ?1 <> 'processed' AND status <> 'processed' THEN NULL ELSE ncf END,
                    updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?5",
                params![
                    update.status.as_str(),
                    update.rejection_reason,
                    update.error_message,
                    ai_response,
                    scan_id,
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::ScanNotFound(scan_id.to_string()));
            }

            if let Some((p, products_found, rewards)) = &processed {
                conn.execute(
                    "UPDATE scans SET
                        points_earned = ?1,
                        products_found = ?2,
                        ncf = ?3,
                        invoice_date = ?4,
                        pharmacy_id = ?5,
                        sales_rep_rewards = ?6,
                        expires_at = ?7
                     WHERE id = ?8",
                    params![
                        p.points_earned,
                        products_found,
                        p.ncf,
                        p.invoice_date,
                        p.pharmacy_id,
                        rewards,
                        p.expires_at,
                        scan_id,
                    ],
                )?;
            }
            debug!(scan_id = %scan_id, status = %update.status, "Scan written");
            Ok(())
        })
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn adjust_clerk(&self, user_id: &str, points: i64, scans: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            if points == 0 {
                Self::bump(
                    conn,
                    "users",
                    user_id,
                    "UPDATE users SET scan_count = scan_count + ?1 WHERE id = ?2",
                    &[scans],
                )
            } else {
                Self::bump(
                    conn,
                    "users",
                    user_id,
                    "UPDATE users SET points = points + ?1, scan_count = scan_count + ?2 WHERE id = ?3",
                    &[points, scans],
                )
            }
        })
    }

    async fn adjust_pharmacy(&self, pharmacy_id: &str, points: i64, scans: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            Self::bump(
                conn,
                "pharmacies",
                pharmacy_id,
                "UPDATE pharmacies SET
                    monthly_points = monthly_points + ?1,
                    lifetime_points = lifetime_points + ?1,
                    scan_count = scan_count + ?2
                 WHERE id = ?3",
                &[points, scans],
            )
        })
    }

    async fn credit_rep(&self, rep_id: &str, points: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            Self::bump(
                conn,
                "users",
                rep_id,
                "UPDATE users SET points = points + ?1, monthly_sales = monthly_sales + ?1 WHERE id = ?2",
                &[points],
            )
        })
    }
}

#[async_trait]
impl IdScanRepository for SqliteStore {
    async fn claim_id_scan(&self, scan_id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE id_scans SET claimed_at = CURRENT_TIMESTAMP
                 WHERE id = ?1 AND status = 'uploaded' AND claimed_at IS NULL",
                params![scan_id],
            )?;
            Ok(changed == 1)
        })
    }

    async fn id_scan_image(&self, scan_id: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            let path = conn
                .query_row(
                    "SELECT storage_path FROM id_scans WHERE id = ?1",
                    params![scan_id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?;
            Ok(path.flatten())
        })
    }

    async fn complete_id_scan(&self, scan_id: &str, data: &IdCardData) -> Result<(), StoreError> {
        let data = serde_json::to_string(data)?;
        self.with_conn(|conn| {
            Self::bump_text(
                conn,
                scan_id,
                "UPDATE id_scans SET status = 'processed', data = ?1, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?2",
                &data,
            )
        })
    }

    async fn fail_id_scan(&self, scan_id: &str, message: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            Self::bump_text(
                conn,
                scan_id,
                "UPDATE id_scans SET status = 'error', error_message = ?1, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?2",
                message,
            )
        })
    }
}

impl SqliteStore {
    fn bump_text(conn: &Connection, scan_id: &str, sql: &str, value: &str) -> Result<(), StoreError> {
        if conn.execute(sql, params![value, scan_id])? == 0 {
            return Err(StoreError::Missing {
                table: "id_scans",
                id: scan_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
impl SqliteStore {
    pub fn insert_product(
        &self,
        name: &str,
        line: Option<&str>,
        commission: f64,
        points: i64,
        status: ProductStatus,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO products (id, name, keywords, line, commission, points, status)
                 VALUES (?1, ?2, '[]', ?3, ?4, ?5, ?6)",
                params![name.to_lowercase(), name, line, commission, points, status.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn insert_pharmacy(
        &self,
        id: &str,
        name: &str,
        assignments: &[(&str, &[&str])],
    ) -> Result<(), StoreError> {
        let map: HashMap<&str, &[&str]> = assignments.iter().copied().collect();
        let json = serde_json::to_string(&map)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pharmacies (id, name, rep_assignments) VALUES (?1, ?2, ?3)",
                params![id, name, json],
            )?;
            Ok(())
        })
    }

    pub fn insert_user(
        &self,
        id: &str,
        role: Role,
        pharmacy_id: Option<&str>,
        assigned: &[&str],
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(assigned)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, role, pharmacy_id, assigned_pharmacies) VALUES (?1, ?2, ?3, ?4)",
                params![id, role.as_str(), pharmacy_id, json],
            )?;
            Ok(())
        })
    }

    /// Inserts a scan already in `uploaded`.
    pub fn insert_scan(&self, id: &str, user_id: &str, storage_path: Option<&str>) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO scans (id, user_id, storage_path, status) VALUES (?1, ?2, ?3, 'uploaded')",
                params![id, user_id, storage_path],
            )?;
            Ok(())
        })
    }

    pub fn insert_id_scan(&self, id: &str, user_id: &str, storage_path: Option<&str>) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO id_scans (id, user_id, storage_path, status) VALUES (?1, ?2, ?3, 'uploaded')",
                params![id, user_id, storage_path],
            )?;
            Ok(())
        })
    }

    pub fn set_scan_ncf_for_test(&self, id: &str, ncf: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("UPDATE scans SET ncf = ?1 WHERE id = ?2", params![ncf, id])?;
            Ok(())
        })
    }

    /// (points, scan_count, monthly_sales)
    pub fn user_counters(&self, id: &str) -> Result<(i64, i64, i64), StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT points, scan_count, monthly_sales FROM users WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?)
        })
    }

    /// (scan_count, monthly_points, lifetime_points)
    pub fn pharmacy_counters(&self, id: &str) -> Result<(i64, i64, i64), StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT scan_count, monthly_points, lifetime_points FROM pharmacies WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?)
        })
    }

    /// (status, data, error_message)
    pub fn id_scan_row(&self, id: &str) -> Result<(String, Option<String>, Option<String>), StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT status, data, error_message FROM id_scans WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_succeeds_once() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_scan("s1", "u1", Some("a.jpg")).unwrap();
        assert!(store.claim_scan("s1").await.unwrap());
        assert!(!store.claim_scan("s1").await.unwrap());
        assert!(!store.claim_scan("missing").await.unwrap());
    }

    #[tokio::test]
    async fn reference_rows_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_product("Aspirina", Some("OTC"), 10.0, 5, ProductStatus::Active).unwrap();
        store.insert_product("Jarabe", None, 0.0, 2, ProductStatus::Inactive).unwrap();
        store.insert_pharmacy("ph1", "Farmacia Uno", &[("repA", &["OTC"])]).unwrap();
        store.insert_user("clerk", Role::Clerk, Some("ph1"), &[]).unwrap();
        store.insert_user("repA", Role::SalesRep, None, &["ph1"]).unwrap();
        store.insert_user("repB", Role::SalesRep, None, &["ph2"]).unwrap();

        let products = store.products().await.unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[1].status, ProductStatus::Inactive);

        let pharmacies = store.pharmacies().await.unwrap();
        assert_eq!(pharmacies[0].rep_assignments["repA"], vec!["OTC"]);

        let clerk = store.user("clerk").await.unwrap().unwrap();
        assert_eq!(clerk.allowed_pharmacies(), vec!["ph1"]);
        assert!(store.user("nobody").await.unwrap().is_none());

        let reps = store.sales_reps_for("ph1").await.unwrap();
        assert_eq!(reps.len(), 1);
        assert_eq!(reps[0].id, "repA");
    }

    #[tokio::test]
    async fn counters_increment_in_place() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_user("u1", Role::Clerk, None, &[]).unwrap();
        store.adjust_clerk("u1", 10, 1).await.unwrap();
        store.adjust_clerk("u1", 0, 1).await.unwrap();
        store.adjust_clerk("u1", -4, -1).await.unwrap();
        assert_eq!(store.user_counters("u1").unwrap(), (6, 1, 0));

        let err = store.adjust_clerk("ghost", 1, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Missing { table: "users", .. }));
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(SqliteStore::open_in_memory().unwrap());
        store.insert_pharmacy("ph1", "Farmacia Uno", &[]).unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..50 {
            let store = store.clone();
            tasks.spawn(async move { store.adjust_pharmacy("ph1", 3, 1).await });
        }
        while let Some(done) = tasks.join_next().await {
            done.unwrap().unwrap();
        }
        assert_eq!(store.pharmacy_counters("ph1").unwrap(), (50, 150, 150));
    }

    #[tokio::test]
    async fn ncf_reservation_is_exclusive_until_released() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_scan("s1", "u1", Some("a.jpg")).unwrap();
        store.insert_scan("s2", "u1", Some("b.jpg")).unwrap();

        assert!(store.reserve_ncf("s1", "B0100000001").await.unwrap());
        assert!(store.reserve_ncf("s1", "B0100000001").await.unwrap());
        assert!(!store.reserve_ncf("s2", "B0100000001").await.unwrap());
        assert!(matches!(
            store.reserve_ncf("nope", "B0100000009").await.unwrap_err(),
            StoreError::ScanNotFound(_)
        ));

        // flagged for review: the NCF goes back
        store
            .write_scan("s1", &ScanUpdate::status(ScanStatus::PendingReview).with_reason("low total"))
            .await
            .unwrap();
        assert_eq!(store.scan("s1").await.unwrap().unwrap().ncf, None);
        assert!(store.reserve_ncf("s2", "B0100000001").await.unwrap());
    }

    #[tokio::test]
    async fn reversed_scans_keep_their_ncf() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_scan("s1", "u1", Some("a.jpg")).unwrap();
        store.insert_scan("s2", "u1", Some("b.jpg")).unwrap();
        assert!(store.reserve_ncf("s1", "B0100000001").await.unwrap());
        store.write_scan("s1", &ScanUpdate::status(ScanStatus::Processed)).await.unwrap();
        store
            .write_scan("s1", &ScanUpdate::status(ScanStatus::Rejected).with_reason("forged"))
            .await
            .unwrap();

        assert_eq!(store.scan("s1").await.unwrap().unwrap().ncf.as_deref(), Some("B0100000001"));
        assert!(!store.reserve_ncf("s2", "B0100000001").await.unwrap());
    }

    #[tokio::test]
    async fn writing_an_unknown_scan_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .write_scan("nope", &ScanUpdate::error("boom"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ScanNotFound(_)));
    }
}
