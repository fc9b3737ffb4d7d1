//! Sample `Product` entity the driver stores.

use std::sync::OnceLock;

use chrono::{DateTime, SubsecRound, Utc};
use fake::faker::lorem::en::Word;
use fake::Fake;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cleanarch_domain::{
    unknown_field, DomainError, DomainResult, Entity, EntityValidator, FieldDef, FieldKind,
    FieldValue, Filter, Lang, ValidateEntity, IDENTITY_FIELDS,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Option<i64>,
    pub uuid: Uuid,
    pub name: String,
    pub price: f64,
    pub in_stock: bool,
    pub lang: Lang,
    pub created_at: DateTime<Utc>,
}

impl Default for Product {
    fn default() -> Self {
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            name: String::new(),
            price: 0.0,
            in_stock: true,
            lang: Lang::default(),
            created_at: Utc::now().trunc_subsecs(6),
        }
    }
}

static PRODUCT_SCHEMA: [FieldDef; 7] = [
    IDENTITY_FIELDS[0],
    IDENTITY_FIELDS[1],
    FieldDef::new("name", FieldKind::Text),
    FieldDef::new("price", FieldKind::Float),
    FieldDef::new("in_stock", FieldKind::Bool),
    FieldDef::new("lang", FieldKind::Text),
    FieldDef::new("created_at", FieldKind::Timestamp),
];

impl Entity for Product {
    const NAME: &'static str = "Product";
    const COLLECTION: &'static str = "products";

    fn schema() -> &'static [FieldDef] {
        &PRODUCT_SCHEMA
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "id" => self.id.into(),
            "uuid" => self.uuid.into(),
            "name" => self.name.clone().into(),
            "price" => self.price.into(),
            "in_stock" => self.in_stock.into(),
            "lang" => self.lang.into(),
            "created_at" => self.created_at.into(),
            _ => return None,
        })
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> DomainResult<()> {
        match name {
            "id" => self.id = value.into_opt_int(Self::NAME, name)?,
            "uuid" => self.uuid = value.into_uuid(Self::NAME, name)?,
            "name" => self.name = value.into_text(Self::NAME, name)?,
            "price" => self.price = value.into_float(Self::NAME, name)?,
            "in_stock" => self.in_stock = value.into_bool(Self::NAME, name)?,
            "lang" => {
                self.lang = value
                    .into_text(Self::NAME, name)?
                    .parse()
                    .map_err(|err: String| DomainError::invalid_field(Self::NAME, name, err))?;
            }
            "created_at" => self.created_at = value.into_timestamp(Self::NAME, name)?,
            _ => return Err(unknown_field(Self::NAME, name)),
        }
        Ok(())
    }

    /// UUIDs resolve by identifier, anything else by exact name.
    fn filter_for_key(key: &str) -> DomainResult<Filter> {
        let key = key.trim();
        Ok(Uuid::parse_str(key).map_or_else(|_| Filter::new().eq("name", key), Filter::by_uuid))
    }
}

// =============================================================================
// NEW PRODUCT REQUEST
// =============================================================================

/// Inbound data for creating a product.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub name: String,
    pub price: f64,
    pub lang: Lang,
}

impl NewProduct {
    /// Random product with a lorem name.
    pub fn fake() -> Self {
        let cents: u32 = (100..100_000).fake();
        Self {
            name: Word().fake(),
            price: f64::from(cents) / 100.0,
            lang: Lang::default(),
        }
    }

    pub fn into_product(self) -> Product {
        Product {
            name: self.name,
            price: self.price,
            lang: self.lang,
            ..Product::default()
        }
    }
}

impl ValidateEntity<Product> for NewProduct {
    fn validator() -> &'static EntityValidator<Self, Product> {
        static VALIDATOR: OnceLock<EntityValidator<NewProduct, Product>> = OnceLock::new();
        VALIDATOR.get_or_init(|| {
            EntityValidator::new()
                .with_data(|req: &Self, _: &()| {
                    if req.name.trim().is_empty() {
                        return Err(DomainError::invalid_field(
                            Product::NAME,
                            "name",
                            "must not be blank",
                        ));
                    }
                    Ok(())
                })
                .with_data(|req: &Self, _: &()| {
                    if !req.price.is_finite() || req.price < 0.0 {
                        return Err(DomainError::invalid_field(
                            Product::NAME,
                            "price",
                            "must be a non-negative amount",
                        ));
                    }
                    Ok(())
                })
                .with_entity(|existing: &Product, req: &Self, _: &()| {
                    if existing.name == req.name {
                        return Err(DomainError::already_exists(Product::NAME, &req.name));
                    }
                    Ok(())
                })
        })
    }
}
