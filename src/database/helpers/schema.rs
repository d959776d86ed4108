//! Schema version tracking and ordered migrations

use tracing::{info, warn};

use crate::database::core::{DatabaseError, QueryOutcome};
use crate::database::Database;

/// One upgrade step; step `n` (1-based) brings the schema to version `n`
pub type Migration<'m> = &'m dyn Fn(&mut Database) -> Result<(), DatabaseError>;

pub struct Schema<'a> {
    db: &'a mut Database,
}

impl<'a> Schema<'a> {
    pub fn new(db: &'a mut Database) -> Self {
        Self { db }
    }

    pub fn version(&mut self) -> Result<u32, DatabaseError> {
        self.db.schema_version()
    }

    pub fn set_version(&mut self, version: u32) -> Result<(), DatabaseError> {
        self.db.set_schema_version(version)
    }

    /// Apply every step above the stored version, in order
    ///
    /// Each step and its version bump share one transaction. The first failing
    /// step is rolled back and its error returned; earlier steps stay applied.
    /// Returns the resulting version.
    pub fn check(&mut self, steps: &[Migration<'_>]) -> Result<u32, DatabaseError> {
        let mut current = self.version()?;

        for (index, step) in steps.iter().enumerate().skip(current as usize) {
            let target = u32::try_from(index + 1)
                .map_err(|_| DatabaseError::Config("too many migration steps".to_string()))?;

            let outcome = self.db.transaction(|db| {
                step(db)?;
                db.set_schema_version(target)
            });

            match outcome {
                Ok(QueryOutcome::Completed(())) => {
                    info!("Schema upgraded to version {}", target);
                    current = target;
                }
                Ok(QueryOutcome::DuplicateKey) => {
                    warn!("Migration to version {} hit a duplicate key", target);
                    return Err(DatabaseError::Sql(format!(
                        "SQL error: duplicate key while migrating to version {}",
                        target
                    )));
                }
                Err(e) => {
                    warn!("Migration to version {} failed: {}", target, e);
                    return Err(e);
                }
            }
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_notes(db: &mut Database) -> Result<(), DatabaseError> {
        let _ = db.execute("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)", &[])?;
        Ok(())
    }

    fn add_created_at(db: &mut Database) -> Result<(), DatabaseError> {
        let _ = db.execute("ALTER TABLE notes ADD COLUMN created_at INTEGER", &[])?;
        Ok(())
    }

    fn broken(db: &mut Database) -> Result<(), DatabaseError> {
        let _ = db.execute("CREATE TABLE tags (id INTEGER PRIMARY KEY)", &[])?;
        let _ = db.execute("ALTER TABLE nowhere ADD COLUMN x INTEGER", &[])?;
        Ok(())
    }

    fn table_exists(db: &mut Database, name: &str) -> bool {
        db.execute(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?",
            &[name.into()],
        )
        .unwrap()
        .completed()
        .map(|r| !r.is_empty())
        .unwrap_or(false)
    }

    #[test]
    fn test_version_round_trip() {
        let mut db = Database::open_in_memory().unwrap();
        let mut schema = db.schema();
        assert_eq!(schema.version().unwrap(), 0);
        schema.set_version(3).unwrap();
        assert_eq!(schema.version().unwrap(), 3);
    }

    #[test]
    fn test_check_applies_pending_steps() {
        let mut db = Database::open_in_memory().unwrap();
        let steps: [Migration<'_>; 2] = [&create_notes, &add_created_at];

        assert_eq!(db.schema().check(&steps[..1]).unwrap(), 1);
        assert_eq!(db.schema().check(&steps).unwrap(), 2);
        // Nothing left to do
        assert_eq!(db.schema().check(&steps).unwrap(), 2);

        let inserted = db
            .execute("INSERT INTO notes (body, created_at) VALUES ('x', 1)", &[])
            .unwrap();
        assert!(inserted.is_completed());
    }

    #[test]
    fn test_check_stops_at_first_failure() {
        let mut db = Database::open_in_memory().unwrap();
        let steps: [Migration<'_>; 3] = [&create_notes, &broken, &add_created_at];

        assert!(db.schema().check(&steps).is_err());
        assert_eq!(db.schema().version().unwrap(), 1);
        assert!(table_exists(&mut db, "notes"));
        assert!(!table_exists(&mut db, "tags"));
    }
}
