//! Field mapping repository for database operations

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::HubError;
use crate::models::connector::{self, Entity as Connector};
use crate::models::field_mapping::{self, Entity as FieldMapping};
use crate::transforms::{TransformSpec, validate_transforms};

pub const MAX_FIELD_NAME_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct NewFieldMapping {
    pub organization_id: Uuid,
    pub connector_id: Uuid,
    /// `None` creates a template mapping
    pub form_id: Option<Uuid>,
    pub form_field: String,
    pub connector_field: String,
    pub transforms: Vec<TransformSpec>,
    pub required: bool,
    pub default_value: Option<JsonValue>,
}

#[derive(Debug, Clone, Default)]
pub struct FieldMappingUpdate {
    pub form_field: Option<String>,
    pub connector_field: Option<String>,
    pub transforms: Option<Vec<TransformSpec>>,
    pub required: Option<bool>,
    pub default_value: Option<Option<JsonValue>>,
}

/// Query scope for [`FieldMappingRepository::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMappingFilter {
    pub organization_id: Uuid,
    pub connector_id: Option<Uuid>,
    /// Restrict to one form's mappings; `None` returns every form
    pub form_id: Option<Uuid>,
    /// With `form_id`, also return template mappings
    pub include_templates: bool,
}

impl FieldMappingFilter {
    pub fn for_connector(organization_id: Uuid, connector_id: Uuid) -> Self {
        Self {
            organization_id,
            connector_id: Some(connector_id),
            form_id: None,
            include_templates: false,
        }
    }

    pub fn for_form(organization_id: Uuid, connector_id: Uuid, form_id: Uuid) -> Self {
        Self {
            organization_id,
            connector_id: Some(connector_id),
            form_id: Some(form_id),
            include_templates: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldMappingRepository {
    pub db: Arc<DatabaseConnection>,
}

impl FieldMappingRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewFieldMapping) -> Result<field_mapping::Model, HubError> {
        let form_field = validate_field_name("formField", &new.form_field)?;
        let connector_field = validate_field_name("connectorField", &new.connector_field)?;
        validate_transforms(&new.transforms)?;
        self.ensure_connector(new.organization_id, new.connector_id)
            .await?;
        self.ensure_unique(new.connector_id, new.form_id, &form_field, None)
            .await?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        let active = field_mapping::ActiveModel {
            id: Set(id),
            organization_id: Set(new.organization_id),
            connector_id: Set(new.connector_id),
            form_id: Set(new.form_id),
            form_field: Set(form_field),
            connector_field: Set(connector_field),
            transforms: Set(transforms_json(&new.transforms)?),
            required: Set(new.required),
            default_value: Set(new.default_value.filter(|v| !v.is_null())),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            deleted_at: Set(None),
        };

        FieldMapping::insert(active).exec(&*self.db).await?;

        FieldMapping::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| HubError::Internal(format!("field mapping {id} not persisted")))
    }

    pub async fn update(
        &self,
        id: Uuid,
        organization_id: Uuid,
        update: FieldMappingUpdate,
    ) -> Result<field_mapping::Model, HubError> {
        let existing = self
            .find_live(id, organization_id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("field mapping {id}")))?;

        let mut model: field_mapping::ActiveModel = existing.clone().into();

        if let Some(form_field) = update.form_field {
            let form_field = validate_field_name("formField", &form_field)?;
            if form_field != existing.form_field {
                self.ensure_unique(existing.connector_id, existing.form_id, &form_field, Some(id))
                    .await?;
            }
            model.form_field = Set(form_field);
        }
        if let Some(connector_field) = update.connector_field {
            model.connector_field = Set(validate_field_name("connectorField", &connector_field)?);
        }
        if let Some(transforms) = update.transforms {
            validate_transforms(&transforms)?;
            model.transforms = Set(transforms_json(&transforms)?);
        }
        if let Some(required) = update.required {
            model.required = Set(required);
        }
        if let Some(default_value) = update.default_value {
            model.default_value = Set(default_value.filter(|v| !v.is_null()));
        }
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    pub async fn soft_delete(&self, id: Uuid, organization_id: Uuid) -> Result<bool, HubError> {
        let Some(existing) = self.find_live(id, organization_id).await? else {
            return Ok(false);
        };

        let now = Utc::now();
        let mut model: field_mapping::ActiveModel = existing.into();
        model.deleted_at = Set(Some(now.into()));
        model.updated_at = Set(now.into());
        model.update(&*self.db).await?;
        Ok(true)
    }

    /// Lists live mappings matching the filter, oldest first
    pub async fn list(
        &self,
        filter: &FieldMappingFilter,
    ) -> Result<Vec<field_mapping::Model>, HubError> {
        let mut query = FieldMapping::find()
            .filter(field_mapping::Column::OrganizationId.eq(filter.organization_id))
            .filter(field_mapping::Column::DeletedAt.is_null());

        if let Some(connector_id) = filter.connector_id {
            query = query.filter(field_mapping::Column::ConnectorId.eq(connector_id));
        }
        if let Some(form_id) = filter.form_id {
            let mut scope = Condition::any().add(field_mapping::Column::FormId.eq(form_id));
            if filter.include_templates {
                scope = scope.add(field_mapping::Column::FormId.is_null());
            }
            query = query.filter(scope);
        }

        Ok(query
            .order_by_asc(field_mapping::Column::CreatedAt)
            .order_by_asc(field_mapping::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// All live mappings of a connector across every form.
    ///
    /// Not organization-filtered; callers verify ownership of each row.
    pub async fn get_by_connector(
        &self,
        connector_id: Uuid,
    ) -> Result<Vec<field_mapping::Model>, HubError> {
        Ok(FieldMapping::find()
            .filter(field_mapping::Column::ConnectorId.eq(connector_id))
            .filter(field_mapping::Column::DeletedAt.is_null())
            .order_by_asc(field_mapping::Column::CreatedAt)
            .order_by_asc(field_mapping::Column::Id)
            .all(&*self.db)
            .await?)
    }

    async fn find_live(
        &self,
        id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<field_mapping::Model>, HubError> {
        Ok(FieldMapping::find_by_id(id)
            .filter(field_mapping::Column::OrganizationId.eq(organization_id))
            .filter(field_mapping::Column::DeletedAt.is_null())
            .one(&*self.db)
            .await?)
    }

    async fn ensure_connector(
        &self,
        organization_id: Uuid,
        connector_id: Uuid,
    ) -> Result<(), HubError> {
        let found = Connector::find_by_id(connector_id)
            .filter(connector::Column::OrganizationId.eq(organization_id))
            .filter(connector::Column::DeletedAt.is_null())
            .one(&*self.db)
            .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(HubError::NotFound(format!("connector {connector_id}"))),
        }
    }

    async fn ensure_unique(
        &self,
        connector_id: Uuid,
        form_id: Option<Uuid>,
        form_field: &str,
        exclude: Option<Uuid>,
    ) -> Result<(), HubError> {
        let mut query = FieldMapping::find()
            .filter(field_mapping::Column::ConnectorId.eq(connector_id))
            .filter(field_mapping::Column::FormField.eq(form_field))
            .filter(field_mapping::Column::DeletedAt.is_null());
        query = match form_id {
            Some(form_id) => query.filter(field_mapping::Column::FormId.eq(form_id)),
            None => query.filter(field_mapping::Column::FormId.is_null()),
        };
        if let Some(exclude) = exclude {
            query = query.filter(field_mapping::Column::Id.ne(exclude));
        }

        if query.one(&*self.db).await?.is_some() {
            return Err(HubError::Conflict(format!(
                "a mapping for form field '{form_field}' already exists"
            )));
        }
        Ok(())
    }
}

fn validate_field_name(label: &str, raw: &str) -> Result<String, HubError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(HubError::Validation(format!("{label} must not be empty")));
    }
    if name.chars().count() > MAX_FIELD_NAME_LEN {
        return Err(HubError::Validation(format!(
            "{label} must be at most {MAX_FIELD_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn transforms_json(transforms: &[TransformSpec]) -> Result<JsonValue, HubError> {
    serde_json::to_value(transforms)
        .map_err(|err| HubError::Internal(format!("failed to encode transforms: {err}")))
}
