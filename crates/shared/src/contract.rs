use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::BackendError,
    protocol::DataRequest,
    records::{Delete, Insert, Record, Select, Update},
};

/// The backend boundary: one method per request, rows in and rows out.
///
/// Implementations return the affected rows for SELECT, INSERT and UPDATE
/// and an empty vector for DELETE.
#[async_trait]
pub trait DataClient: Send + Sync {
    async fn execute(&self, request: DataRequest) -> Result<Vec<Value>, BackendError>;
}

#[async_trait]
impl<C: DataClient + ?Sized> DataClient for Arc<C> {
    async fn execute(&self, request: DataRequest) -> Result<Vec<Value>, BackendError> {
        (**self).execute(request).await
    }
}

#[async_trait]
pub trait DataClientExt: DataClient {
    async fn select<T: Record>(&self, select: Select<T>) -> Result<Vec<T>, BackendError> {
        let rows = self.execute(select.into_request()?).await?;
        decode_rows(rows)
    }

    async fn insert<T: Record>(&self, insert: Insert<T>) -> Result<Vec<T>, BackendError> {
        let rows = self.execute(insert.into_request()?).await?;
        decode_rows(rows)
    }

    async fn update<T: Record>(&self, update: Update<T>) -> Result<Vec<T>, BackendError> {
        let rows = self.execute(update.into_request()?).await?;
        decode_rows(rows)
    }

    async fn delete<T: Record>(&self, delete: Delete<T>) -> Result<(), BackendError> {
        self.execute(delete.into_request()?).await?;
        Ok(())
    }
}

impl<C: DataClient + ?Sized> DataClientExt for C {}

pub fn decode_rows<T: Record>(rows: Vec<Value>) -> Result<Vec<T>, BackendError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|err| {
                BackendError::decode(format!("malformed {} row: {err}", T::COLLECTION))
            })
        })
        .collect()
}
