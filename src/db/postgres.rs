use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{json, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Postgres, Row};
use tracing::info;
use uuid::Uuid;

use super::queries;
use super::{
    field_path, validate_identifier, DbPool, Document, DocumentId, DocumentStore, Filter,
    StoreResult,
};

/// Document store backed by Postgres JSONB tables.
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: DbPool,
}

impl PgDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// A filter rendered to SQL: the `WHERE` fragment and the values bound to
/// its `$1..$n` placeholders.
struct BoundFilter {
    clause: &'static str,
    params: Vec<FilterParam>,
}

enum FilterParam {
    Path(Vec<String>),
    Json(Value),
    Int(i64),
}

impl BoundFilter {
    fn from_filter(filter: &Filter) -> StoreResult<Self> {
        let bound = match filter {
            Filter::All => BoundFilter {
                clause: queries::WHERE_ALL,
                params: vec![],
            },
            Filter::Eq { field, value } => BoundFilter {
                clause: queries::WHERE_FIELD_EQUALS,
                params: vec![
                    FilterParam::Path(field_path(field)?),
                    FilterParam::Json(value.clone()),
                ],
            },
            Filter::Contains { field, value } => BoundFilter {
                clause: queries::WHERE_ARRAY_CONTAINS,
                params: vec![
                    FilterParam::Path(field_path(field)?),
                    FilterParam::Json(json!([value])),
                ],
            },
            Filter::Range { field, start, end } => BoundFilter {
                clause: queries::WHERE_FIELD_IN_RANGE,
                params: vec![
                    FilterParam::Path(field_path(field)?),
                    FilterParam::Int(*start),
                    FilterParam::Int(*end),
                ],
            },
        };
        Ok(bound)
    }

    fn bind<'q>(
        self,
        mut query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        for param in self.params {
            query = match param {
                FilterParam::Path(path) => query.bind(path),
                FilterParam::Json(value) => query.bind(Json(value)),
                FilterParam::Int(i) => query.bind(i),
            };
        }
        query
    }
}

fn render(template: &str, table: &str, clause: &str) -> String {
    template.replace("{table}", table).replace("{where}", clause)
}

fn row_to_document(row: PgRow) -> StoreResult<Document> {
    let id: Uuid = row.try_get("id")?;
    let body: Json<Value> = row.try_get("body")?;
    Ok(Document {
        id: id.to_string(),
        body: body.0,
    })
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn ensure_collection(&self, collection: &str) -> StoreResult<()> {
        validate_identifier(collection)?;
        let sql = queries::CREATE_COLLECTION.replace("{table}", collection);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn ensure_unique_index(&self, collection: &str, field: &str) -> StoreResult<()> {
        validate_identifier(collection)?;
        let path = field_path(field)?;
        let index = format!("{}_{}_key", collection, path.join("_")).to_lowercase();
        validate_identifier(&index)?;

        let sql = queries::CREATE_UNIQUE_INDEX
            .replace("{index}", &index)
            .replace("{table}", collection)
            .replace("{path}", &format!("{{{}}}", path.join(",")));
        sqlx::query(&sql).execute(&self.pool).await?;
        info!("Ensured unique index {} on {}", index, collection);
        Ok(())
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>> {
        validate_identifier(collection)?;
        let bound = BoundFilter::from_filter(filter)?;
        let sql = render(queries::SELECT_FIRST_DOCUMENT, collection, bound.clause);

        let row = bound
            .bind(sqlx::query(&sql))
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_document).transpose()
    }

    async fn find_all(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        validate_identifier(collection)?;
        let bound = BoundFilter::from_filter(filter)?;
        let sql = render(queries::SELECT_DOCUMENTS, collection, bound.clause);

        let rows: Vec<PgRow> = bound
            .bind(sqlx::query(&sql))
            .fetch(&self.pool)
            .try_collect()
            .await?;
        rows.into_iter().map(row_to_document).collect()
    }

    async fn insert_one(&self, collection: &str, body: Value) -> StoreResult<Option<DocumentId>> {
        validate_identifier(collection)?;
        let sql = queries::INSERT_DOCUMENT.replace("{table}", collection);
        let id = Uuid::new_v4();

        // ON CONFLICT DO NOTHING yields no row when a unique index already
        // holds this key.
        let inserted = sqlx::query(&sql)
            .bind(id)
            .bind(Json(body))
            .fetch_optional(&self.pool)
            .await?;
        match inserted {
            Some(row) => {
                let id: Uuid = row.try_get("id")?;
                Ok(Some(id.to_string()))
            }
            None => Ok(None),
        }
    }

    async fn update_one(&self, collection: &str, filter: &Filter, patch: Value) -> StoreResult<u64> {
        validate_identifier(collection)?;
        let bound = BoundFilter::from_filter(filter)?;
        let patch_param = format!("${}", bound.params.len() + 1);
        let sql = render(queries::UPDATE_FIRST_DOCUMENT, collection, bound.clause)
            .replace("{patch}", &patch_param);

        let result = bound
            .bind(sqlx::query(&sql))
            .bind(Json(patch))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        validate_identifier(collection)?;
        let bound = BoundFilter::from_filter(filter)?;
        let sql = render(queries::DELETE_FIRST_DOCUMENT, collection, bound.clause);

        let result = bound.bind(sqlx::query(&sql)).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_table_and_clause() {
        let sql = render(queries::SELECT_DOCUMENTS, "raw_alerts", queries::WHERE_FIELD_EQUALS);
        assert!(sql.contains("FROM raw_alerts WHERE body #> $1 = $2"));
        assert!(!sql.contains('{'));
    }

    #[test]
    fn test_filter_params_follow_placeholders() {
        let bound = BoundFilter::from_filter(&Filter::range("time", 10, 20)).unwrap();
        assert_eq!(bound.clause, queries::WHERE_FIELD_IN_RANGE);
        assert_eq!(bound.params.len(), 3);

        let bound = BoundFilter::from_filter(&Filter::All).unwrap();
        assert!(bound.params.is_empty());
    }

    #[test]
    fn test_contains_wraps_value_in_array() {
        let bound = BoundFilter::from_filter(&Filter::contains("cities", "Haifa")).unwrap();
        match &bound.params[1] {
            FilterParam::Json(value) => assert_eq!(value, &json!(["Haifa"])),
            _ => panic!("expected json parameter"),
        }
    }

    #[test]
    fn test_filter_rejects_bad_field() {
        assert!(BoundFilter::from_filter(&Filter::eq("a;b", "x")).is_err());
    }
}
