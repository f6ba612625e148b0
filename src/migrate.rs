use std::collections::HashSet;

use bson::oid::ObjectId;
use mongodb::{options::IndexOptions, IndexModel};
use serde::{Deserialize, Serialize};

use crate::{app::AppState, mongo_ext::Collection};

#[derive(Serialize, Deserialize)]
pub struct MigrateModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub version: i64,
}

#[derive(Clone)]
pub struct MigrationCollection(pub Collection<MigrateModel>);

impl std::ops::Deref for MigrationCollection {
    type Target = Collection<MigrateModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MigrationCollection {
    pub async fn insert_version(&self, version: i64) -> Result<(), mongodb::error::Error> {
        self.insert_one(
            MigrateModel {
                id: ObjectId::new(),
                version,
            },
            None,
        )
        .await
        .map(|_| ())
    }

    pub async fn applied_versions(&self) -> Result<HashSet<i64>, mongodb::error::Error> {
        Ok(self
            .find_sorted(bson::doc! {}, bson::doc! { "version": 1 })
            .await?
            .into_iter()
            .map(|it| it.version)
            .collect())
    }
}

fn index(keys: bson::Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

impl AppState {
    async fn v1_migrate(&self) -> Result<(), mongodb::error::Error> {
        self.migrate_collection
            .create_index(
                IndexModel::builder()
                    .keys(bson::doc! { "version": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
                None,
            )
            .await?;

        // Not unique: registration tolerates pre-existing duplicate emails.
        self.user_collection
            .create_index(index(bson::doc! { "email": 1 }), None)
            .await?;

        self.parcel_collection
            .create_index(
                index(bson::doc! { "created_by": 1, "creation_date": -1 }),
                None,
            )
            .await?;

        self.payment_collection
            .create_index(index(bson::doc! { "email": 1, "paid_at": -1 }), None)
            .await?;

        self.tracking_collection
            .create_index(index(bson::doc! { "parcelId": 1 }), None)
            .await?;

        Ok(())
    }

    pub async fn run_migration(&self) -> Result<(), mongodb::error::Error> {
        let migration = self.migrate_collection.applied_versions().await?;

        macro_rules! migrate {
            ($version:expr, $fun:ident) => {
                if !migration.contains(&$version) {
                    tracing::debug!("running migration version {}", $version);
                    self.$fun().await?;
                    self.migrate_collection.insert_version($version).await?;
                }
            };
        }

        migrate!(1, v1_migrate);

        Ok(())
    }
}
