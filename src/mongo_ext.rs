use std::ops::Deref;

use bson::{oid::ObjectId, Document};
use mongodb::{
    options::{FindOptions, UpdateModifications},
    results::{DeleteResult, UpdateResult},
    ClientSession,
};
use serde::de::DeserializeOwned;

pub struct Collection<T>(pub mongodb::Collection<T>);

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Collection<T> {
    type Target = mongodb::Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> From<mongodb::Collection<T>> for Collection<T> {
    fn from(value: mongodb::Collection<T>) -> Self {
        Self(value)
    }
}

impl<T> Collection<T>
where
    T: DeserializeOwned + Send + Sync + Unpin,
{
    /// Drains a sorted `find` into memory. There is no pagination.
    pub async fn find_sorted(
        &self,
        filter: Document,
        sort: Document,
    ) -> Result<Vec<T>, mongodb::error::Error> {
        let options = FindOptions::builder().sort(sort).build();
        let mut cursor = self.find(filter, options).await?;

        let mut items = vec![];

        while cursor.advance().await? {
            items.push(cursor.deserialize_current()?);
        }

        Ok(items)
    }

    pub async fn find_one_by_id(&self, id: ObjectId) -> Result<Option<T>, mongodb::error::Error> {
        self.find_one(bson::doc! { "_id": id }, None).await
    }

    pub async fn delete_one_by_id(&self, id: ObjectId) -> Result<DeleteResult, mongodb::error::Error> {
        self.delete_one(bson::doc! { "_id": id }, None).await
    }

    pub async fn update_one_by_id_with_session(
        &self,
        id: ObjectId,
        update: impl Into<UpdateModifications>,
        session: &mut ClientSession,
    ) -> Result<UpdateResult, mongodb::error::Error> {
        self.update_one_with_session(bson::doc! { "_id": id }, update, None, session)
            .await
    }
}
