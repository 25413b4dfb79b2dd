//! Registry document schema and JSON encoding.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A goods introduction document as accepted by the registry.
///
/// Field names match the registry's JSON exactly, including the two
/// camelCase ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub description: Description,
    pub doc_id: String,
    pub doc_status: String,
    pub doc_type: String,
    #[serde(rename = "importRequest")]
    pub import_request: bool,
    pub owner_inn: String,
    pub participant_inn: String,
    pub producer_inn: String,
    pub production_date: String,
    pub production_type: String,
    #[serde(default)]
    pub products: Vec<Product>,
    pub reg_date: String,
    pub reg_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    #[serde(rename = "participantInn")]
    pub participant_inn: String,
}

/// One product line within a [`Document`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub certificate_document: String,
    pub certificate_document_date: String,
    pub certificate_document_number: String,
    pub owner_inn: String,
    pub producer_inn: String,
    pub production_date: String,
    pub tnved_code: String,
    pub uit_code: String,
    pub uitu_code: String,
}

/// Encode any serializable document as a JSON request body.
pub fn serialize<D: Serialize + ?Sized>(document: &D) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(document)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;

    fn sample_document() -> Document {
        Document {
            description: Description {
                participant_inn: "1234567890".to_string(),
            },
            doc_id: "doc12345".to_string(),
            doc_status: "NEW".to_string(),
            doc_type: "LP_INTRODUCE_GOODS".to_string(),
            import_request: true,
            owner_inn: "1234567890".to_string(),
            participant_inn: "1234567890".to_string(),
            producer_inn: "0987654321".to_string(),
            production_date: "2020-01-23".to_string(),
            production_type: "OWN_PRODUCTION".to_string(),
            products: vec![Product {
                certificate_document: "cert_doc".to_string(),
                certificate_document_date: "2020-01-23".to_string(),
                certificate_document_number: "cert12345".to_string(),
                owner_inn: "1234567890".to_string(),
                producer_inn: "0987654321".to_string(),
                production_date: "2020-01-23".to_string(),
                tnved_code: "123456".to_string(),
                uit_code: "uit12345".to_string(),
                uitu_code: "uitu12345".to_string(),
            }],
            reg_date: "2020-01-23".to_string(),
            reg_number: "reg12345".to_string(),
        }
    }

    #[test]
    fn test_document_wire_field_names() {
        let body = serialize(&sample_document()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["description"]["participantInn"], "1234567890");
        assert_eq!(value["importRequest"], true);
        assert_eq!(value["doc_type"], "LP_INTRODUCE_GOODS");
        assert_eq!(value["products"][0]["tnved_code"], "123456");
        assert!(value.get("import_request").is_none());
    }

    #[test]
    fn test_serialize_is_deterministic() {
        let document = sample_document();
        assert_eq!(serialize(&document).unwrap(), serialize(&document).unwrap());
    }

    #[test]
    fn test_document_parses_registry_json() {
        let json = r#"{
            "description": {"participantInn": "1"},
            "doc_id": "d", "doc_status": "NEW", "doc_type": "LP_INTRODUCE_GOODS",
            "importRequest": false, "owner_inn": "2", "participant_inn": "1",
            "producer_inn": "3", "production_date": "2020-01-23",
            "production_type": "OWN_PRODUCTION", "reg_date": "2020-01-23",
            "reg_number": "r"
        }"#;

        let document: Document = serde_json::from_str(json).unwrap();
        assert_eq!(document.description.participant_inn, "1");
        assert!(!document.import_request);
        assert!(document.products.is_empty());
    }

    #[test]
    fn test_serialize_failure_is_distinguishable() {
        // JSON object keys must be strings
        let mut unserializable = HashMap::new();
        unserializable.insert(vec![1u8], "value");

        let result = serialize(&unserializable);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
