//! The fixed set of PDFs behind the knowledge base

use super::schemas::{DocumentSource, DocumentType};

const VERA_HISTORY_CHUNK_SIZE: usize = 1000;
const VERA_HISTORY_CHUNK_OVERLAP: usize = 200;
const REGULATION_CHUNK_SIZE: usize = 1500;
const REGULATION_CHUNK_OVERLAP: usize = 300;
const DOCUMENT_LANGUAGE: &str = "es";

pub const DOCUMENT_SOURCES: [DocumentSource; 3] = [
    DocumentSource {
        key: "vera_history",
        url: "https://pub-739843c5b2e64a7881e1fa442a3d9075.r2.dev/veramoney-history.pdf",
        document_type: DocumentType::VeraHistory,
        title: "Historia de VeraMoney",
        language: DOCUMENT_LANGUAGE,
        chunk_size: VERA_HISTORY_CHUNK_SIZE,
        chunk_overlap: VERA_HISTORY_CHUNK_OVERLAP,
    },
    DocumentSource {
        key: "fintec_regulation",
        url: "https://pub-739843c5b2e64a7881e1fa442a3d9075.r2.dev/Regulacio%CC%81n%20fintec.pdf",
        document_type: DocumentType::FintecRegulation,
        title: "Regulacion Fintech Uruguay",
        language: DOCUMENT_LANGUAGE,
        chunk_size: REGULATION_CHUNK_SIZE,
        chunk_overlap: REGULATION_CHUNK_OVERLAP,
    },
    DocumentSource {
        key: "bank_regulation",
        url: "https://pub-739843c5b2e64a7881e1fa442a3d9075.r2.dev/Regulacio%CC%81n%20Bancaria%20Uruguaya_%20Investigacio%CC%81n%20Profunda.pdf",
        document_type: DocumentType::BankRegulation,
        title: "Regulacion Bancaria Uruguaya",
        language: DOCUMENT_LANGUAGE,
        chunk_size: REGULATION_CHUNK_SIZE,
        chunk_overlap: REGULATION_CHUNK_OVERLAP,
    },
];

/// Titles the knowledge guardrail checks citations against.
pub fn known_titles() -> impl Iterator<Item = &'static str> {
    DOCUMENT_SOURCES.iter().map(|s| s.title)
}
