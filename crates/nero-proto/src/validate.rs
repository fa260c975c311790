//! Structural validation of record values by tag.
//!
//! A record value must be a UTF-8 JSON object carrying a `metadata` tag.
//! Each tag has a set of required fields; everything beyond them is
//! preserved verbatim so re-storing a record never loses unknown fields.
//! Cryptographic signature verification is delegated to a callback
//! supplied by the daemon; this layer only checks that a signature is
//! present where one is required.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// The known record tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordTag {
    /// A marketplace account.
    User,
    /// A product listing.
    Listing,
    /// A rating on a product.
    ProductRating,
    /// A rating on a seller.
    SellerRating,
    /// A direct message between accounts.
    Message,
}

impl RecordTag {
    /// Returns the wire form of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordTag::User => "user",
            RecordTag::Listing => "listing",
            RecordTag::ProductRating => "product_rating",
            RecordTag::SellerRating => "seller_rating",
            RecordTag::Message => "message",
        }
    }
}

impl fmt::Display for RecordTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordTag {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(RecordTag::User),
            "listing" => Ok(RecordTag::Listing),
            "product_rating" => Ok(RecordTag::ProductRating),
            "seller_rating" => Ok(RecordTag::SellerRating),
            "message" => Ok(RecordTag::Message),
            other => Err(ValidationError::UnknownTag(other.to_string())),
        }
    }
}

/// Why a record value failed validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The value is not a JSON object.
    #[error("value is not a JSON object")]
    NotAnObject,

    /// The value has no `metadata` tag.
    #[error("missing metadata tag")]
    MissingMetadata,

    /// The `metadata` tag names no known record type.
    #[error("unknown record tag: {0}")]
    UnknownTag(String),

    /// A required field is absent.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A field is present but has the wrong shape or range.
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// The signature callback rejected the record.
    #[error("signature verification failed")]
    BadSignature,
}

/// Parses a record value into its tag and JSON document.
pub fn parse_tagged(value: &str) -> Result<(RecordTag, Value), ValidationError> {
    let doc: Value = serde_json::from_str(value).map_err(|_| ValidationError::NotAnObject)?;
    if !doc.is_object() {
        return Err(ValidationError::NotAnObject);
    }
    let tag = doc
        .get("metadata")
        .and_then(Value::as_str)
        .ok_or(ValidationError::MissingMetadata)?;
    let tag = RecordTag::from_str(tag)?;
    Ok((tag, doc))
}

/// Validates the parsed document of a record value.
pub trait RecordValidator: Send + Sync {
    /// Returns Ok when the document is acceptable for its tag.
    fn validate(&self, tag: RecordTag, doc: &Value) -> Result<(), ValidationError>;
}

/// Signature verification callback supplied by the daemon binary.
///
/// Receives the tag and the full document; returns false to reject.
pub type SignatureCheck = Arc<dyn Fn(RecordTag, &Value) -> bool + Send + Sync>;

/// The built-in structural validator: required fields per tag plus a
/// present signature where the tag demands one.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralValidator;

impl StructuralValidator {
    fn require_str(doc: &Value, field: &str) -> Result<(), ValidationError> {
        match doc.get(field) {
            None => Err(ValidationError::MissingField(field.to_string())),
            Some(v) if v.as_str().map(|s| !s.is_empty()).unwrap_or(false) => Ok(()),
            Some(_) => Err(ValidationError::InvalidField(field.to_string())),
        }
    }

    fn require_number(doc: &Value, field: &str) -> Result<(), ValidationError> {
        match doc.get(field) {
            None => Err(ValidationError::MissingField(field.to_string())),
            Some(v) if v.is_number() => Ok(()),
            Some(_) => Err(ValidationError::InvalidField(field.to_string())),
        }
    }

    fn validate_user(doc: &Value) -> Result<(), ValidationError> {
        Self::require_str(doc, "public_key")?;
        Self::require_str(doc, "signature")?;
        Self::require_str(doc, "monero_address")?;
        Self::require_str(doc, "created_at")?;
        Ok(())
    }

    fn validate_listing(doc: &Value) -> Result<(), ValidationError> {
        Self::require_str(doc, "id")?;
        Self::require_str(doc, "seller_id")?;
        Self::require_number(doc, "quantity")?;
        Self::require_number(doc, "price")?;
        Self::require_str(doc, "currency")?;
        Self::require_str(doc, "condition")?;
        Self::require_str(doc, "date")?;
        Self::require_str(doc, "signature")?;

        let product = doc
            .get("product")
            .ok_or_else(|| ValidationError::MissingField("product".to_string()))?;
        if !product.is_object() {
            return Err(ValidationError::InvalidField("product".to_string()));
        }
        Self::require_str(product, "name")?;
        Self::require_str(product, "description")?;
        Self::require_str(product, "category")?;
        Ok(())
    }

    fn validate_product_rating(doc: &Value) -> Result<(), ValidationError> {
        Self::require_str(doc, "rater_id")?;
        Self::require_str(doc, "signature")?;
        match doc.get("stars").and_then(Value::as_i64) {
            Some(stars) if (1..=5).contains(&stars) => Ok(()),
            Some(_) => Err(ValidationError::InvalidField("stars".to_string())),
            None => Err(ValidationError::MissingField("stars".to_string())),
        }
    }

    fn validate_seller_rating(doc: &Value) -> Result<(), ValidationError> {
        Self::require_str(doc, "rater_id")?;
        Self::require_str(doc, "signature")?;
        match doc.get("score").and_then(Value::as_i64) {
            Some(0) | Some(1) => Ok(()),
            Some(_) => Err(ValidationError::InvalidField("score".to_string())),
            None => Err(ValidationError::MissingField("score".to_string())),
        }
    }

    fn validate_message(doc: &Value) -> Result<(), ValidationError> {
        Self::require_str(doc, "content")?;
        Self::require_str(doc, "signature")?;
        Ok(())
    }
}

impl RecordValidator for StructuralValidator {
    fn validate(&self, tag: RecordTag, doc: &Value) -> Result<(), ValidationError> {
        match tag {
            RecordTag::User => Self::validate_user(doc),
            RecordTag::Listing => Self::validate_listing(doc),
            RecordTag::ProductRating => Self::validate_product_rating(doc),
            RecordTag::SellerRating => Self::validate_seller_rating(doc),
            RecordTag::Message => Self::validate_message(doc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing() -> Value {
        json!({
            "metadata": "listing",
            "id": "u-1",
            "seller_id": "5AdFzy...",
            "quantity": 3,
            "price": 12.5,
            "currency": "XMR",
            "condition": "new",
            "date": "2025-11-02T10:00:00Z",
            "signature": "SigV1...",
            "product": {
                "name": "Widget",
                "description": "A widget",
                "category": "Tools"
            }
        })
    }

    #[test]
    fn test_parse_tagged() {
        let (tag, _) = parse_tagged(&listing().to_string()).unwrap();
        assert_eq!(tag, RecordTag::Listing);

        assert_eq!(parse_tagged("not json"), Err(ValidationError::NotAnObject));
        assert_eq!(parse_tagged("[1,2]"), Err(ValidationError::NotAnObject));
        assert_eq!(
            parse_tagged("{\"id\":\"x\"}"),
            Err(ValidationError::MissingMetadata)
        );
        assert!(matches!(
            parse_tagged("{\"metadata\":\"order\"}"),
            Err(ValidationError::UnknownTag(_))
        ));
    }

    #[test]
    fn test_listing_valid() {
        let doc = listing();
        assert!(StructuralValidator.validate(RecordTag::Listing, &doc).is_ok());
    }

    #[test]
    fn test_listing_missing_product_field() {
        let mut doc = listing();
        doc["product"].as_object_mut().unwrap().remove("category");
        assert_eq!(
            StructuralValidator.validate(RecordTag::Listing, &doc),
            Err(ValidationError::MissingField("category".to_string()))
        );
    }

    #[test]
    fn test_listing_missing_signature() {
        let mut doc = listing();
        doc.as_object_mut().unwrap().remove("signature");
        assert_eq!(
            StructuralValidator.validate(RecordTag::Listing, &doc),
            Err(ValidationError::MissingField("signature".to_string()))
        );
    }

    #[test]
    fn test_user_required_fields() {
        let doc = json!({
            "metadata": "user",
            "public_key": "-----BEGIN PUBLIC KEY-----...",
            "signature": "SigV1...",
            "monero_address": "5AdFzy...",
            "created_at": "2025-01-01T00:00:00Z"
        });
        assert!(StructuralValidator.validate(RecordTag::User, &doc).is_ok());

        let missing = json!({ "metadata": "user", "public_key": "pk" });
        assert!(StructuralValidator.validate(RecordTag::User, &missing).is_err());
    }

    #[test]
    fn test_stars_range() {
        for stars in 1..=5 {
            let doc = json!({
                "metadata": "product_rating",
                "rater_id": "r-1",
                "signature": "SigV1...",
                "stars": stars
            });
            assert!(StructuralValidator
                .validate(RecordTag::ProductRating, &doc)
                .is_ok());
        }

        let doc = json!({
            "metadata": "product_rating",
            "rater_id": "r-1",
            "signature": "SigV1...",
            "stars": 6
        });
        assert_eq!(
            StructuralValidator.validate(RecordTag::ProductRating, &doc),
            Err(ValidationError::InvalidField("stars".to_string()))
        );
    }

    #[test]
    fn test_score_binary() {
        for score in [0, 1] {
            let doc = json!({
                "metadata": "seller_rating",
                "rater_id": "r-1",
                "signature": "SigV1...",
                "score": score
            });
            assert!(StructuralValidator
                .validate(RecordTag::SellerRating, &doc)
                .is_ok());
        }

        let doc = json!({
            "metadata": "seller_rating",
            "rater_id": "r-1",
            "signature": "SigV1...",
            "score": 3
        });
        assert!(StructuralValidator
            .validate(RecordTag::SellerRating, &doc)
            .is_err());
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let mut doc = listing();
        doc["attributes"] = json!([{ "weight": "2kg" }]);
        doc["shipping"] = json!(["EU", "US"]);
        assert!(StructuralValidator.validate(RecordTag::Listing, &doc).is_ok());
    }
}
