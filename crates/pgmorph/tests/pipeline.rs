//! End-to-end tests over the offline half of the pipeline:
//! parse -> diff -> generate -> store -> reload.

use pgmorph::{diff, generate, parse, MigrationStore, Schema};
use tempfile::TempDir;

fn schema_of(ddl: &str) -> Schema {
    parse(ddl, "test.sql").unwrap().0
}

const DESIRED: &str = "
CREATE TABLE users (
    id SERIAL PRIMARY KEY,
    email VARCHAR(255) NOT NULL UNIQUE,
    created_at TIMESTAMP DEFAULT now()
);

CREATE TABLE posts (
    id SERIAL PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    body TEXT
);

CREATE INDEX posts_user_id_idx ON posts (user_id);
";

#[test]
fn generated_migration_round_trips_through_store() {
    let desired = schema_of(DESIRED);
    let delta = diff(&schema_of(""), &desired);
    let sql = generate(&delta);

    let dir = TempDir::new().unwrap();
    let store = MigrationStore::new(dir.path());
    let migration = store.create("initial_schema", &sql).unwrap();

    let (loaded, warnings) = store.load_all().unwrap();
    assert!(warnings.is_empty());
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].version, 1);
    assert_eq!(loaded[0].checksum, migration.checksum);

    // The stored DDL still parses back to the schema it was derived from.
    let reparsed = schema_of(&loaded[0].sql);
    assert_eq!(reparsed, desired);
}

#[test]
fn incremental_change_yields_minimal_script() {
    let current = schema_of(DESIRED);
    let evolved = DESIRED.replace("body TEXT\n", "body TEXT,\n    published BOOLEAN DEFAULT false\n");
    let desired = schema_of(&evolved);

    let delta = diff(&current, &desired);
    let sql = generate(&delta);

    assert!(sql.contains("ALTER TABLE \"posts\" ADD COLUMN \"published\" BOOLEAN DEFAULT false;"));
    assert!(!sql.contains("CREATE TABLE"));
    assert!(!sql.contains("DROP"));
}

#[test]
fn applying_the_same_schema_twice_is_a_fixpoint() {
    let desired = schema_of(DESIRED);
    let first = diff(&schema_of(""), &desired);
    assert!(!first.is_empty());

    // After the first migration lands, the next diff is empty, so the next
    // generate has nothing but its header.
    let second = diff(&desired, &desired);
    assert!(second.is_empty());
    assert!(second.warnings.is_empty());
}

#[test]
fn successive_generations_get_successive_versions() {
    let dir = TempDir::new().unwrap();
    let store = MigrationStore::new(dir.path());

    let v1 = diff(&schema_of(""), &schema_of("CREATE TABLE a (x INT);"));
    let m1 = store.create("create_a", &generate(&v1)).unwrap();

    let v2 = diff(
        &schema_of("CREATE TABLE a (x INT);"),
        &schema_of("CREATE TABLE a (x INT, y INT);"),
    );
    let m2 = store.create("add_y", &generate(&v2)).unwrap();

    assert_eq!((m1.version, m2.version), (1, 2));
    let (all, _) = store.load_all().unwrap();
    assert_eq!(all.len(), 2);
}
