//! SQL for the Postgres document store. Every collection is its own table;
//! `{table}`, `{index}`, `{path}` and `{where}` are substituted with
//! validated identifiers before execution.

pub const CREATE_COLLECTION: &str = r#"
CREATE TABLE IF NOT EXISTS {table} (
    id UUID PRIMARY KEY,
    body JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

pub const CREATE_UNIQUE_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {table} ((body #>> '{path}'));
"#;

pub const SELECT_DOCUMENTS: &str = r#"
SELECT id, body FROM {table} WHERE {where} ORDER BY created_at, id
"#;

pub const SELECT_FIRST_DOCUMENT: &str = r#"
SELECT id, body FROM {table} WHERE {where} ORDER BY created_at, id LIMIT 1
"#;

pub const INSERT_DOCUMENT: &str = r#"
INSERT INTO {table} (id, body)
VALUES ($1, $2)
ON CONFLICT DO NOTHING
RETURNING id;
"#;

pub const UPDATE_FIRST_DOCUMENT: &str = r#"
UPDATE {table}
SET body = body || {patch}
WHERE id = (SELECT id FROM {table} WHERE {where} ORDER BY created_at, id LIMIT 1);
"#;

pub const DELETE_FIRST_DOCUMENT: &str = r#"
DELETE FROM {table}
WHERE id = (SELECT id FROM {table} WHERE {where} ORDER BY created_at, id LIMIT 1);
"#;

pub const WHERE_ALL: &str = "TRUE";

pub const WHERE_FIELD_EQUALS: &str = "body #> $1 = $2";

pub const WHERE_ARRAY_CONTAINS: &str = "body #> $1 @> $2";

pub const WHERE_FIELD_IN_RANGE: &str = "(body #>> $1)::BIGINT BETWEEN $2 AND $3";
