//! SQLite implementation of [`EntityRepository`]
//!
//! One row per `(entity_type, entity_key)`. Each create or update runs in its
//! own transaction, so a failure never leaves a half-written record behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::domain::{
    Canonical, CandidateRecord, EntityFields, EntityKey, EntityRepository, EntityType, FieldDiff, FieldValue,
    StorageError, StoredRecord,
};

const SELECT_COLUMNS: &str = r#"
    SELECT id, entity_type, entity_key, name, localized_name, rarity, element,
           weapon_category, region, health, attack, defense, ascension_stat,
           ascension_value, description, two_piece_bonus, four_piece_bonus,
           created_at, updated_at
    FROM entities
"#;

#[derive(Clone)]
pub struct SqliteEntityRepository {
    pool: SqlitePool,
}

impl SqliteEntityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self, entity_type: EntityType) -> Result<i64, StorageError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE entity_type = ?")
            .bind(entity_type.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)
    }

    /// All records of one type, by key.
    pub async fn list(&self, entity_type: EntityType) -> Result<Vec<StoredRecord>, StorageError> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} WHERE entity_type = ? ORDER BY entity_key"))
            .bind(entity_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn fetch_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<StoredRecord>, StorageError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(conn)
            .await
            .map_err(storage_error)?;
        row.as_ref().map(record_from_row).transpose()
    }
}

#[async_trait]
impl EntityRepository for SqliteEntityRepository {
    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(storage_error)
    }

    async fn find_by_key(
        &self,
        entity_type: EntityType,
        key: &EntityKey,
    ) -> Result<Option<StoredRecord>, StorageError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE entity_type = ? AND entity_key = ?"))
            .bind(entity_type.as_str())
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn create(&self, candidate: &CandidateRecord) -> Result<StoredRecord, StorageError> {
        let fields = &candidate.fields;
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let result = sqlx::query(
            r#"
            INSERT INTO entities
            (entity_type, entity_key, name, localized_name, rarity, element, weapon_category,
             region, health, attack, defense, ascension_stat, ascension_value, description,
             two_piece_bonus, four_piece_bonus, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(candidate.entity_type.as_str())
        .bind(candidate.key.as_str())
        .bind(&fields.name)
        .bind(&fields.localized_name)
        .bind(fields.rarity.map(i64::from))
        .bind(fields.element.as_ref().map(Canonical::storage_value))
        .bind(fields.weapon_category.as_ref().map(Canonical::storage_value))
        .bind(fields.region.as_ref().map(Canonical::storage_value))
        .bind(fields.health)
        .bind(fields.attack)
        .bind(fields.defense)
        .bind(fields.ascension_stat.as_ref().map(Canonical::storage_value))
        .bind(fields.ascension_value)
        .bind(&fields.description)
        .bind(&fields.two_piece_bonus)
        .bind(&fields.four_piece_bonus)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        let id = result.last_insert_rowid();
        let record = Self::fetch_by_id(&mut tx, id).await?.ok_or_else(|| StorageError::NotFound {
            entity_type: candidate.entity_type,
            key: candidate.key.to_string(),
        })?;
        tx.commit().await.map_err(storage_error)?;

        debug!(id, key = %candidate.key, "inserted {} record", candidate.entity_type);
        Ok(record)
    }

    async fn update(&self, existing: &StoredRecord, diff: &FieldDiff) -> Result<StoredRecord, StorageError> {
        if diff.is_empty() {
            return Ok(existing.clone());
        }

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("UPDATE entities SET ");
        {
            let mut assignments = builder.separated(", ");
            for change in diff {
                assignments.push(format!("{} = ", change.field.column()));
                match &change.value {
                    FieldValue::Text(text) => assignments.push_bind_unseparated(text.clone()),
                    FieldValue::Integer(number) => assignments.push_bind_unseparated(*number),
                    FieldValue::Real(number) => assignments.push_bind_unseparated(*number),
                };
            }
            assignments.push("updated_at = ");
            assignments.push_bind_unseparated(Utc::now());
        }
        builder.push(" WHERE id = ");
        builder.push_bind(existing.id);

        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let result = builder.build().execute(&mut *tx).await.map_err(storage_error)?;
        let not_found = || StorageError::NotFound {
            entity_type: existing.entity_type,
            key: existing.key.to_string(),
        };
        if result.rows_affected() == 0 {
            return Err(not_found());
        }
        let record = Self::fetch_by_id(&mut tx, existing.id).await?.ok_or_else(not_found)?;
        tx.commit().await.map_err(storage_error)?;

        debug!(id = existing.id, changed = diff.len(), "updated {} record", existing.entity_type);
        Ok(record)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<StoredRecord, StorageError> {
    let entity_type: String = column(row, "entity_type")?;
    let entity_type = entity_type.parse::<EntityType>().map_err(|e| corrupt("entity_type", e))?;
    let key: String = column(row, "entity_key")?;
    let key = EntityKey::new(key).map_err(|e| corrupt("entity_key", e))?;

    let rarity: Option<i64> = column(row, "rarity")?;
    let rarity = rarity
        .map(u8::try_from)
        .transpose()
        .map_err(|e| corrupt("rarity", e))?;
    let classification = |name: &str| -> Result<Option<String>, StorageError> { column(row, name) };

    let fields = EntityFields {
        name: column(row, "name")?,
        localized_name: column(row, "localized_name")?,
        rarity,
        element: classification("element")?.as_deref().map(Canonical::from_storage),
        weapon_category: classification("weapon_category")?
            .as_deref()
            .map(Canonical::from_storage),
        region: classification("region")?.as_deref().map(Canonical::from_storage),
        health: column(row, "health")?,
        attack: column(row, "attack")?,
        defense: column(row, "defense")?,
        ascension_stat: classification("ascension_stat")?
            .as_deref()
            .map(Canonical::from_storage),
        ascension_value: column(row, "ascension_value")?,
        description: column(row, "description")?,
        two_piece_bonus: column(row, "two_piece_bonus")?,
        four_piece_bonus: column(row, "four_piece_bonus")?,
    };

    Ok(StoredRecord {
        id: column(row, "id")?,
        entity_type,
        key,
        fields,
        created_at: column::<DateTime<Utc>>(row, "created_at")?,
        updated_at: column::<DateTime<Utc>>(row, "updated_at")?,
    })
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StorageError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|e| corrupt(name, e))
}

fn corrupt(column: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt {
        column: column.to_string(),
        message: err.to_string(),
    }
}

fn storage_error(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_check_violation() => {
            StorageError::Constraint {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Io(io) => StorageError::Io {
            message: io.to_string(),
        },
        sqlx::Error::ColumnDecode { index, source } => StorageError::Corrupt {
            column: index,
            message: source.to_string(),
        },
        other => StorageError::Unavailable {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Element, FieldChange, StatKind, TrackedField};
    use crate::test_utils::TestDatabase;

    fn candidate(attack: f64) -> CandidateRecord {
        CandidateRecord {
            entity_type: EntityType::Character,
            key: EntityKey::new("Example").unwrap(),
            fields: EntityFields {
                name: Some("Example".into()),
                rarity: Some(5),
                element: Some(Canonical::Mapped(Element::Anemo)),
                region: Some(Canonical::Unmapped("Khaenri'ah".into())),
                health: Some(14695.0),
                attack: Some(attack),
                defense: Some(769.0),
                ascension_stat: Some(Canonical::Mapped(StatKind::HealingBonus)),
                ascension_value: Some(22.2),
                ..EntityFields::default()
            },
        }
    }

    #[tokio::test]
    async fn create_then_find_round_trips_fields() {
        let db = TestDatabase::new().await.unwrap();
        let repo = SqliteEntityRepository::new(db.pool());

        let created = repo.create(&candidate(239.0)).await.unwrap();
        let found = repo
            .find_by_key(EntityType::Character, &EntityKey::new("Example").unwrap())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found, created);
        assert_eq!(found.fields.region, Some(Canonical::Unmapped("Khaenri'ah".into())));
        assert_eq!(found.created_at, found.updated_at);
        assert!(
            repo.find_by_key(EntityType::Weapon, &EntityKey::new("Example").unwrap())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_key_is_a_constraint_error() {
        let db = TestDatabase::new().await.unwrap();
        let repo = SqliteEntityRepository::new(db.pool());

        repo.create(&candidate(239.0)).await.unwrap();
        let err = repo.create(&candidate(239.0)).await.unwrap_err();

        assert!(matches!(err, StorageError::Constraint { .. }));
        assert_eq!(repo.count(EntityType::Character).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_touches_only_diffed_columns() {
        let db = TestDatabase::new().await.unwrap();
        let repo = SqliteEntityRepository::new(db.pool());
        let stored = repo.create(&candidate(239.0)).await.unwrap();

        let mut diff = FieldDiff::default();
        diff.push(FieldChange {
            field: TrackedField::Attack,
            previous: Some(FieldValue::Real(239.0)),
            value: FieldValue::Real(250.0),
        });
        let updated = repo.update(&stored, &diff).await.unwrap();

        assert_eq!(updated.fields.attack, Some(250.0));
        assert_eq!(updated.fields.health, stored.fields.health);
        assert_eq!(updated.fields.element, stored.fields.element);
        assert_eq!(updated.created_at, stored.created_at);
        assert!(updated.updated_at >= stored.updated_at);
    }

    #[tokio::test]
    async fn artifact_set_bonuses_persist_and_update() {
        let db = TestDatabase::new().await.unwrap();
        let repo = SqliteEntityRepository::new(db.pool());
        let gladiator = CandidateRecord {
            entity_type: EntityType::Artifact,
            key: EntityKey::new("角斗士的终幕礼").unwrap(),
            fields: EntityFields {
                name: Some("角斗士的终幕礼".into()),
                rarity: Some(5),
                two_piece_bonus: Some("攻击力提高18%。".into()),
                four_piece_bonus: Some("普通攻击造成的伤害提升35%。".into()),
                ..EntityFields::default()
            },
        };
        let stored = repo.create(&gladiator).await.unwrap();
        assert_eq!(stored.fields, gladiator.fields);

        let mut diff = FieldDiff::default();
        diff.push(FieldChange {
            field: TrackedField::FourPieceBonus,
            previous: stored.fields.four_piece_bonus.clone().map(FieldValue::Text),
            value: FieldValue::Text("普通攻击造成的伤害提升40%。".into()),
        });
        let updated = repo.update(&stored, &diff).await.unwrap();

        assert_eq!(updated.fields.four_piece_bonus.as_deref(), Some("普通攻击造成的伤害提升40%。"));
        assert_eq!(updated.fields.two_piece_bonus, stored.fields.two_piece_bonus);
        assert_eq!(repo.count(EntityType::Artifact).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_of_vanished_row_is_not_found() {
        let db = TestDatabase::new().await.unwrap();
        let repo = SqliteEntityRepository::new(db.pool());
        let mut stored = repo.create(&candidate(239.0)).await.unwrap();
        stored.id += 100;

        let mut diff = FieldDiff::default();
        diff.push(FieldChange {
            field: TrackedField::Rarity,
            previous: None,
            value: FieldValue::Integer(4),
        });

        assert!(matches!(
            repo.update(&stored, &diff).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn closed_pool_reports_unavailable() {
        let db = TestDatabase::new().await.unwrap();
        let repo = SqliteEntityRepository::new(db.pool());
        db.pool().close().await;

        assert!(matches!(repo.ping().await, Err(StorageError::Unavailable { .. })));
    }
}
