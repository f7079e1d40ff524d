//! Field mapping entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::transforms::{TransformError, TransformSpec};

/// One form field paired with one connector field. A null `form_id` marks a
/// template mapping shared by every form using the connector.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "field_mappings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub organization_id: Uuid,

    pub connector_id: Uuid,

    pub form_id: Option<Uuid>,

    pub form_field: String,

    pub connector_field: String,

    /// Ordered `[{type, params}]` transform chain
    #[sea_orm(column_type = "JsonBinary")]
    pub transforms: JsonValue,

    pub required: bool,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub default_value: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    pub deleted_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::connector::Entity",
        from = "Column::ConnectorId",
        to = "super::connector::Column::Id"
    )]
    Connector,
}

impl Related<super::connector::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Connector.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Decode the stored transform chain.
    pub fn transform_chain(&self) -> Result<Vec<TransformSpec>, TransformError> {
        if self.transforms.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(self.transforms.clone()).map_err(|err| {
            TransformError::InvalidParams {
                transform: "chain",
                reason: err.to_string(),
            }
        })
    }

    pub fn is_template(&self) -> bool {
        self.form_id.is_none()
    }
}
