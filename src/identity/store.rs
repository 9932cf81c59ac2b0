//! Role record persistence behind a thin store seam.
//!
//! Two interchangeable backends: a relational-style Parquet table and a
//! document-style one-JSON-file-per-identity directory. Both uphold the
//! same invariant: at most one record per identity.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::portal::Portal;

use super::principal::{RecordPatch, RoleRecord};

pub trait RoleStore: Send + Sync {
    fn read_record(&self, id: Uuid) -> AppResult<Option<RoleRecord>>;

    /// Upsert by identity id: any existing record for the id is replaced,
    /// so a second write can never produce a second record.
    fn write_record(&self, id: Uuid, record: RoleRecord) -> AppResult<()>;

    /// Apply a partial update to an existing record. Fails with `NotFound`
    /// when no record exists for the id.
    fn update_record(&self, id: Uuid, patch: RecordPatch) -> AppResult<()>;
}

/// Which role store backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleBackend {
    Table,
    Document,
}

#[derive(Error, Debug)]
#[error("unknown role backend '{0}', expected 'table' or 'document'")]
pub struct UnknownBackend(pub String);

impl FromStr for RoleBackend {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(RoleBackend::Table),
            "document" => Ok(RoleBackend::Document),
            other => Err(UnknownBackend(other.to_string())),
        }
    }
}

impl RoleBackend {
    pub fn open(self, root: &Path) -> std::sync::Arc<dyn RoleStore> {
        match self {
            RoleBackend::Table => std::sync::Arc::new(TableRoleStore::new(root)),
            RoleBackend::Document => std::sync::Arc::new(DocumentRoleStore::new(root)),
        }
    }
}

// --- Relational-style backend: one Parquet table of role rows ---

pub struct TableRoleStore {
    path: PathBuf,
}

fn mk_schema_df() -> DataFrame {
    let ids: Series = Series::new("user_id".into(), Vec::<String>::new());
    let roles: Series = Series::new("role".into(), Vec::<String>::new());
    let names: Series = Series::new("full_name".into(), Vec::<String>::new());
    let emails: Series = Series::new("email".into(), Vec::<String>::new());
    let depts: Series = Series::new("department".into(), Vec::<Option<String>>::new());
    let created: Series = Series::new("created_at".into(), Vec::<i64>::new());
    let updated: Series = Series::new("updated_at".into(), Vec::<i64>::new());
    DataFrame::new(vec![
        ids.into(),
        roles.into(),
        names.into(),
        emails.into(),
        depts.into(),
        created.into(),
        updated.into(),
    ])
    .unwrap()
}

fn internal(e: impl std::fmt::Display) -> AppError {
    AppError::internal("role_table".to_string(), e.to_string())
}

fn read_table(path: &Path) -> AppResult<DataFrame> {
    if !path.exists() {
        return Ok(mk_schema_df());
    }
    let file = std::fs::File::open(path)?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| AppError::io("role_table_read".to_string(), e.to_string()))
}

fn write_table(path: &Path, mut df: DataFrame) -> AppResult<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    let mut f = std::fs::File::create(path)?;
    ParquetWriter::new(&mut f)
        .finish(&mut df)
        .map_err(|e| AppError::io("role_table_write".to_string(), e.to_string()))?;
    Ok(())
}

fn str_at(df: &DataFrame, col: &str, i: usize) -> AppResult<String> {
    let v = df.column(col).and_then(|c| c.get(i)).map_err(internal)?;
    Ok(match v {
        AnyValue::String(s) => s.to_string(),
        AnyValue::StringOwned(s) => s.to_string(),
        _ => String::new(),
    })
}

fn opt_str_at(df: &DataFrame, col: &str, i: usize) -> AppResult<Option<String>> {
    let v = df.column(col).and_then(|c| c.get(i)).map_err(internal)?;
    Ok(match v {
        AnyValue::String(s) => Some(s.to_string()),
        AnyValue::StringOwned(s) => Some(s.to_string()),
        _ => None,
    })
}

fn i64_at(df: &DataFrame, col: &str, i: usize) -> AppResult<i64> {
    let v = df.column(col).and_then(|c| c.get(i)).map_err(internal)?;
    Ok(match v {
        AnyValue::Int64(n) => n,
        _ => 0,
    })
}

impl TableRoleStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { path: root.as_ref().join("role_records.parquet") }
    }

    fn find_row(df: &DataFrame, id: Uuid) -> AppResult<Option<usize>> {
        let key = id.to_string();
        for i in 0..df.height() {
            if str_at(df, "user_id", i)? == key {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn record_at(df: &DataFrame, i: usize) -> AppResult<RoleRecord> {
        let role_tag = str_at(df, "role", i)?;
        // An unrecognised persisted tag must deny downstream, never grant.
        let role = Portal::from_str(&role_tag).map_err(|_| {
            AppError::internal("role_tag".to_string(), format!("unrecognised role tag '{role_tag}'"))
        })?;
        Ok(RoleRecord {
            role,
            full_name: str_at(df, "full_name", i)?,
            email: str_at(df, "email", i)?,
            department: opt_str_at(df, "department", i)?,
            created_at: i64_at(df, "created_at", i)?,
            updated_at: i64_at(df, "updated_at", i)?,
        })
    }

    fn without_row(df: DataFrame, id: Uuid) -> AppResult<DataFrame> {
        if df.height() == 0 {
            return Ok(df);
        }
        let key = id.to_string();
        let user_s = df.column("user_id").map_err(internal)?.clone();
        let series = user_s.as_materialized_series();
        let mask: ChunkedArray<BooleanType> = series
            .iter()
            .map(|av| match av {
                AnyValue::String(s) => s != key,
                AnyValue::StringOwned(ref s) => s.as_str() != key,
                _ => true,
            })
            .collect();
        df.filter(&mask).map_err(internal)
    }

    fn row_df(id: Uuid, rec: &RoleRecord) -> AppResult<DataFrame> {
        DataFrame::new(vec![
            Series::new("user_id".into(), vec![id.to_string()]).into(),
            Series::new("role".into(), vec![rec.role.as_str().to_string()]).into(),
            Series::new("full_name".into(), vec![rec.full_name.clone()]).into(),
            Series::new("email".into(), vec![rec.email.clone()]).into(),
            Series::new("department".into(), vec![rec.department.clone()]).into(),
            Series::new("created_at".into(), vec![rec.created_at]).into(),
            Series::new("updated_at".into(), vec![rec.updated_at]).into(),
        ])
        .map_err(internal)
    }
}

impl RoleStore for TableRoleStore {
    fn read_record(&self, id: Uuid) -> AppResult<Option<RoleRecord>> {
        let df = read_table(&self.path)?;
        match Self::find_row(&df, id)? {
            Some(i) => Ok(Some(Self::record_at(&df, i)?)),
            None => Ok(None),
        }
    }

    fn write_record(&self, id: Uuid, record: RoleRecord) -> AppResult<()> {
        let df = read_table(&self.path)?;
        let df = Self::without_row(df, id)?;
        let new = Self::row_df(id, &record)?;
        if df.height() == 0 {
            write_table(&self.path, new)
        } else {
            let stacked = df.vstack(&new).map_err(internal)?;
            write_table(&self.path, stacked)
        }
    }

    fn update_record(&self, id: Uuid, patch: RecordPatch) -> AppResult<()> {
        let df = read_table(&self.path)?;
        let Some(i) = Self::find_row(&df, id)? else {
            return Err(AppError::not_found("record_not_found", "no role record for identity"));
        };
        let mut rec = Self::record_at(&df, i)?;
        if let Some(name) = patch.full_name {
            rec.full_name = name;
        }
        if let Some(dept) = patch.department {
            rec.department = Some(dept);
        }
        rec.updated_at = chrono::Utc::now().timestamp_millis();
        let df = Self::without_row(df, id)?;
        let updated = Self::row_df(id, &rec)?;
        if df.height() == 0 {
            write_table(&self.path, updated)
        } else {
            let stacked = df.vstack(&updated).map_err(internal)?;
            write_table(&self.path, stacked)
        }
    }
}

// --- Document-style backend: one JSON document per identity ---

/// On-disk shape of a role document. The role is kept as a raw tag so that
/// an unrecognised value surfaces through the same `role_tag` error as the
/// table backend and denies downstream instead of failing the parse.
#[derive(Debug, Serialize, Deserialize)]
struct RoleDoc {
    role: String,
    full_name: String,
    email: String,
    #[serde(default)]
    department: Option<String>,
    created_at: i64,
    updated_at: i64,
}

pub struct DocumentRoleStore {
    dir: PathBuf,
}

impl DocumentRoleStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { dir: root.as_ref().join("role_records") }
    }

    fn doc_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl RoleStore for DocumentRoleStore {
    fn read_record(&self, id: Uuid) -> AppResult<Option<RoleRecord>> {
        let path = self.doc_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(&path)?;
        let doc: RoleDoc = serde_json::from_reader(file)
            .map_err(|e| AppError::internal("role_doc_parse".to_string(), e.to_string()))?;
        let role = Portal::from_str(&doc.role).map_err(|_| {
            AppError::internal("role_tag".to_string(), format!("unrecognised role tag '{}'", doc.role))
        })?;
        Ok(Some(RoleRecord {
            role,
            full_name: doc.full_name,
            email: doc.email,
            department: doc.department,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }))
    }

    fn write_record(&self, id: Uuid, record: RoleRecord) -> AppResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let file = std::fs::File::create(self.doc_path(id))?;
        serde_json::to_writer_pretty(file, &record)
            .map_err(|e| AppError::io("role_doc_write".to_string(), e.to_string()))?;
        Ok(())
    }

    fn update_record(&self, id: Uuid, patch: RecordPatch) -> AppResult<()> {
        let Some(mut rec) = self.read_record(id)? else {
            return Err(AppError::not_found("record_not_found", "no role record for identity"));
        };
        if let Some(name) = patch.full_name {
            rec.full_name = name;
        }
        if let Some(dept) = patch.department {
            rec.department = Some(dept);
        }
        rec.updated_at = chrono::Utc::now().timestamp_millis();
        self.write_record(id, rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parse() {
        assert_eq!("table".parse::<RoleBackend>().unwrap(), RoleBackend::Table);
        assert_eq!("Document".parse::<RoleBackend>().unwrap(), RoleBackend::Document);
        assert!("firestore".parse::<RoleBackend>().is_err());
    }
}
