//! Catalog introspection: turns a live database into the canonical model.
//!
//! Reads go through `information_schema` wherever it carries enough detail
//! (tables, columns, keys, foreign keys, checks); only indexes need
//! `pg_catalog`, which the standard views do not cover. All queries run
//! inside one `REPEATABLE READ` transaction so the snapshot is internally
//! consistent. The output goes through the same normalization as the
//! parser (see [`crate::typemap`]), which is what makes the two
//! comparable.

use crate::error::{MorphError, Result};
use crate::history::HISTORY_TABLE;
use crate::schema::{Column, Constraint, ConstraintKind, ForeignKeyRef, Index, Schema, Table};
use crate::typemap;
use chrono::Utc;
use deadpool_postgres::{GenericClient, Pool};
use tokio_postgres::{IsolationLevel, Row};
use tracing::{debug, info};

/// Catalog introspector for one environment.
pub struct Introspector {
    pool: Pool,
    schema: String,
}

impl Introspector {
    /// Create an introspector over `pool`, reading the given namespace.
    pub fn new(pool: Pool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    /// Take one consistent snapshot of the live schema.
    pub async fn snapshot(&self, version_tag: &str) -> Result<Schema> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| MorphError::pool(e, "getting connection for introspection"))?;

        let tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()
            .await?;

        let mut tables = Vec::new();
        for name in self.load_table_names(&tx).await? {
            let mut table = Table::new(name);
            self.load_columns(&tx, &mut table).await?;
            self.load_primary_key(&tx, &mut table).await?;
            self.load_unique_constraints(&tx, &mut table).await?;
            self.load_foreign_keys(&tx, &mut table).await?;
            self.load_check_constraints(&tx, &mut table).await?;
            self.load_indexes(&tx, &mut table).await?;
            tables.push(table);
        }

        tx.commit().await?;

        info!(
            "introspected {} tables from schema '{}'",
            tables.len(),
            self.schema
        );
        Ok(Schema {
            tables,
            version_tag: version_tag.to_string(),
            captured_at: Utc::now(),
        })
    }

    /// Approximate row count for one table, from the planner statistics.
    /// The command layer uses this to vet NOT NULL tightening on live
    /// tables.
    pub async fn approximate_row_count(&self, table: &str) -> Result<i64> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MorphError::pool(e, "getting connection for row count"))?;

        let query = "
            SELECT COALESCE(c.reltuples, 0)::int8
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2
        ";
        let row = client.query_one(query, &[&self.schema, &table]).await?;
        Ok(row.get::<_, i64>(0))
    }

    async fn load_table_names<C: GenericClient>(&self, client: &C) -> Result<Vec<String>> {
        let query = "
            SELECT table_name
            FROM information_schema.tables
            WHERE table_type = 'BASE TABLE'
              AND table_schema = $1
            ORDER BY table_name
        ";
        let rows = client.query(query, &[&self.schema]).await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<_, String>(0))
            .filter(|name| name != HISTORY_TABLE)
            .collect())
    }

    async fn load_columns<C: GenericClient>(&self, client: &C, table: &mut Table) -> Result<()> {
        let query = "
            SELECT
                column_name,
                udt_name,
                COALESCE(character_maximum_length, 0)::int4,
                COALESCE(numeric_precision, 0)::int4,
                COALESCE(numeric_scale, 0)::int4,
                is_nullable = 'YES',
                is_identity = 'YES',
                column_default
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        ";

        let rows = client.query(query, &[&self.schema, &table.name]).await?;
        for row in rows {
            let udt: String = row.get(1);
            let max_length: i32 = row.get(2);
            let precision: i32 = row.get(3);
            let scale: i32 = row.get(4);
            let identity: bool = row.get(6);
            let raw_default: Option<String> = row.get(7);

            // Identity columns and serial sequences both reduce to the
            // canonical identity marker.
            let default = if identity {
                Some(typemap::IDENTITY_DEFAULT.to_string())
            } else {
                raw_default.map(|d| typemap::normalize_default(&d))
            };

            table.columns.push(Column {
                name: row.get(0),
                sql_type: reconstruct_type(&udt, max_length, precision, scale),
                nullable: row.get(5),
                primary_key: false,
                default,
            });
        }

        debug!("loaded {} columns for {}", table.columns.len(), table.name);
        Ok(())
    }

    async fn load_primary_key<C: GenericClient>(&self, client: &C, table: &mut Table) -> Result<()> {
        let rows = self
            .load_key_columns(client, &table.name, "PRIMARY KEY")
            .await?;
        let Some((name, columns)) = group_by_constraint(&rows).into_iter().next() else {
            return Ok(());
        };

        for col_name in &columns {
            if let Some(col) = table.columns.iter_mut().find(|c| &c.name == col_name) {
                col.primary_key = true;
            }
        }
        table.constraints.push(Constraint {
            name,
            kind: ConstraintKind::PrimaryKey,
            columns,
            check_expr: None,
            reference: None,
        });
        Ok(())
    }

    async fn load_unique_constraints<C: GenericClient>(
        &self,
        client: &C,
        table: &mut Table,
    ) -> Result<()> {
        let rows = self.load_key_columns(client, &table.name, "UNIQUE").await?;
        for (name, columns) in group_by_constraint(&rows) {
            table.constraints.push(Constraint {
                name,
                kind: ConstraintKind::Unique,
                columns,
                check_expr: None,
                reference: None,
            });
        }
        Ok(())
    }

    /// Key columns of every constraint of `kind` on one table, ordered by
    /// constraint name then key position.
    async fn load_key_columns<C: GenericClient>(
        &self,
        client: &C,
        table: &str,
        kind: &str,
    ) -> Result<Vec<Row>> {
        let query = "
            SELECT tc.constraint_name, kcu.column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON kcu.constraint_schema = tc.constraint_schema
             AND kcu.constraint_name = tc.constraint_name
            WHERE tc.table_schema = $1
              AND tc.table_name = $2
              AND tc.constraint_type = $3
            ORDER BY tc.constraint_name, kcu.ordinal_position
        ";
        Ok(client.query(query, &[&self.schema, &table, &kind]).await?)
    }

    async fn load_foreign_keys<C: GenericClient>(&self, client: &C, table: &mut Table) -> Result<()> {
        // One row per referencing column; `position_in_unique_constraint`
        // pairs it with the referenced column. The referential rules come
        // back as words ('CASCADE', 'SET NULL', ...) rather than catalog
        // codes.
        let query = "
            SELECT
                kcu.constraint_name,
                kcu.column_name,
                rk.table_name,
                rk.column_name,
                rc.delete_rule,
                rc.update_rule
            FROM information_schema.referential_constraints rc
            JOIN information_schema.key_column_usage kcu
              ON kcu.constraint_schema = rc.constraint_schema
             AND kcu.constraint_name = rc.constraint_name
            JOIN information_schema.key_column_usage rk
              ON rk.constraint_schema = rc.unique_constraint_schema
             AND rk.constraint_name = rc.unique_constraint_name
             AND rk.ordinal_position = kcu.position_in_unique_constraint
            WHERE rc.constraint_schema = $1
              AND kcu.table_name = $2
            ORDER BY kcu.constraint_name, kcu.ordinal_position
        ";

        let rows = client.query(query, &[&self.schema, &table.name]).await?;
        for row in rows {
            let name: String = row.get(0);
            let column: String = row.get(1);
            let ref_column: String = row.get(3);

            match table.constraints.last_mut() {
                Some(fk) if fk.kind == ConstraintKind::ForeignKey && fk.name == name => {
                    fk.columns.push(column);
                    if let Some(r) = fk.reference.as_mut() {
                        r.columns.push(ref_column);
                    }
                }
                _ => table.constraints.push(Constraint {
                    name,
                    kind: ConstraintKind::ForeignKey,
                    columns: vec![column],
                    check_expr: None,
                    reference: Some(ForeignKeyRef {
                        table: row.get(2),
                        columns: vec![ref_column],
                        on_delete: referential_action(row.get::<_, String>(4).as_str()),
                        on_update: referential_action(row.get::<_, String>(5).as_str()),
                    }),
                }),
            }
        }
        Ok(())
    }

    async fn load_check_constraints<C: GenericClient>(
        &self,
        client: &C,
        table: &mut Table,
    ) -> Result<()> {
        // information_schema lists NOT NULL columns as synthetic check
        // rows; those belong to the nullability flag, not here.
        let query = "
            SELECT cc.constraint_name, cc.check_clause
            FROM information_schema.check_constraints cc
            JOIN information_schema.table_constraints tc
              ON tc.constraint_schema = cc.constraint_schema
             AND tc.constraint_name = cc.constraint_name
            WHERE tc.table_schema = $1
              AND tc.table_name = $2
              AND NOT (cc.constraint_name LIKE '%not_null'
                       AND cc.check_clause LIKE '%IS NOT NULL')
            ORDER BY cc.constraint_name
        ";

        let rows = client.query(query, &[&self.schema, &table.name]).await?;
        for row in rows {
            let clause: String = row.get(1);
            // Checks compare by expression; the column list is
            // producer-dependent and stays empty.
            table.constraints.push(Constraint {
                name: row.get(0),
                kind: ConstraintKind::Check,
                columns: Vec::new(),
                check_expr: Some(typemap::normalize_check_expr(&clause)),
                reference: None,
            });
        }
        Ok(())
    }

    async fn load_indexes<C: GenericClient>(&self, client: &C, table: &mut Table) -> Result<()> {
        // The standard views do not describe indexes, so this is the one
        // pg_catalog read. Indexes owned by a constraint (primary key,
        // unique) are expressed through that constraint instead.
        let query = "
            SELECT
                ci.relname,
                x.indisunique,
                (SELECT array_agg(att.attname ORDER BY k.ord)
                   FROM unnest(x.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
                   JOIN pg_catalog.pg_attribute att
                     ON att.attrelid = x.indrelid AND att.attnum = k.attnum)
            FROM pg_catalog.pg_index x
            JOIN pg_catalog.pg_class ci ON ci.oid = x.indexrelid
            JOIN pg_catalog.pg_class ct ON ct.oid = x.indrelid
            JOIN pg_catalog.pg_namespace ns ON ns.oid = ct.relnamespace
            WHERE ns.nspname = $1
              AND ct.relname = $2
              AND NOT x.indisprimary
              AND NOT EXISTS (
                  SELECT 1 FROM pg_catalog.pg_constraint con
                  WHERE con.conindid = x.indexrelid
              )
            ORDER BY ci.relname
        ";

        let rows = client.query(query, &[&self.schema, &table.name]).await?;
        for row in rows {
            table.indexes.push(Index {
                name: row.get(0),
                unique: row.get(1),
                columns: row.get(2),
            });
        }

        debug!("loaded {} indexes for {}", table.indexes.len(), table.name);
        Ok(())
    }
}

/// Fold ordered (constraint_name, column_name) rows into one entry per
/// constraint. Rows arrive sorted, so a same-name run is one constraint.
fn group_by_constraint(rows: &[Row]) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for row in rows {
        let name: String = row.get(0);
        let column: String = row.get(1);
        match grouped.last_mut() {
            Some((current, columns)) if *current == name => columns.push(column),
            _ => grouped.push((name, vec![column])),
        }
    }
    grouped
}

/// `NO ACTION` is the default rule and folds to absence; every other rule
/// keeps its wording.
fn referential_action(rule: &str) -> Option<String> {
    match rule {
        "NO ACTION" => None,
        other => Some(other.to_string()),
    }
}

/// Rebuild the parameterized type from catalog columns, then normalize it
/// the same way the parser does.
fn reconstruct_type(udt: &str, max_length: i32, precision: i32, scale: i32) -> String {
    let raw = match udt {
        "varchar" | "bpchar" if max_length > 0 => format!("{}({})", udt, max_length),
        "numeric" if precision > 0 => format!("numeric({},{})", precision, scale),
        "bit" | "varbit" if max_length > 0 => format!("{}({})", udt, max_length),
        _ => udt.to_string(),
    };
    typemap::normalize_type(&raw)
}
