//! Operation (capability) tags and document types

use crate::errors::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of operations a run can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operation {
    WebLogin,
    InvoiceDownload,
    InvoiceExport,
    StatementDownload,
    OrderGuideDownload,
    PaymentImportInfo,
    PaymentExportInfo,
    PaymentPay,
    AccountingImportMultipleEntities,
    VendorImportList,
    BankAccountImportList,
    GlImportList,
    PoDownload,
}

impl Operation {
    pub const ALL: &'static [Operation] = &[
        Operation::WebLogin,
        Operation::InvoiceDownload,
        Operation::InvoiceExport,
        Operation::StatementDownload,
        Operation::OrderGuideDownload,
        Operation::PaymentImportInfo,
        Operation::PaymentExportInfo,
        Operation::PaymentPay,
        Operation::AccountingImportMultipleEntities,
        Operation::VendorImportList,
        Operation::BankAccountImportList,
        Operation::GlImportList,
        Operation::PoDownload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::WebLogin => "internal.web_login",
            Operation::InvoiceDownload => "invoice.download",
            Operation::InvoiceExport => "invoice.export",
            Operation::StatementDownload => "statement.download",
            Operation::OrderGuideDownload => "order_guide.download",
            Operation::PaymentImportInfo => "payment.import_info",
            Operation::PaymentExportInfo => "payment.export_info",
            Operation::PaymentPay => "payment.pay",
            Operation::AccountingImportMultipleEntities => "accounting.import_multiple_entities",
            Operation::VendorImportList => "vendor.import_list",
            Operation::BankAccountImportList => "bank_account.import_list",
            Operation::GlImportList => "gl.import_list",
            Operation::PoDownload => "po.download",
        }
    }

    /// Parse an operation tag; unknown tags are rejected
    pub fn parse(s: &str) -> Result<Self, AppError> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| AppError::UnsupportedOperation {
                operation: s.to_string(),
            })
    }

    /// Operations implied by this capability. The accounting multi-entity
    /// sync capability covers the individual entity imports.
    pub fn implied(&self) -> &[Operation] {
        match self {
            Operation::AccountingImportMultipleEntities => &[
                Operation::AccountingImportMultipleEntities,
                Operation::VendorImportList,
                Operation::BankAccountImportList,
                Operation::GlImportList,
            ],
            _ => std::slice::from_ref(self),
        }
    }

    /// Operations that only make sense with at least one company attached
    /// to the job
    pub fn requires_companies(&self) -> bool {
        matches!(
            self,
            Operation::PaymentExportInfo | Operation::AccountingImportMultipleEntities
        )
    }

    /// Document-discovery operations produce discovered files
    pub fn discovers_documents(&self) -> bool {
        matches!(
            self,
            Operation::InvoiceDownload
                | Operation::StatementDownload
                | Operation::OrderGuideDownload
                | Operation::PoDownload
                | Operation::PaymentImportInfo
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Operation {
    type Error = AppError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Operation::parse(&s)
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        op.as_str().to_string()
    }
}

/// Document type of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    Payment,
    Statement,
    OrderGuide,
    Po,
    Unknown,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::Payment => "payment",
            DocumentType::Statement => "statement",
            DocumentType::OrderGuide => "order_guide",
            DocumentType::Po => "po",
            DocumentType::Unknown => "unknown",
        }
    }
}

impl From<String> for DocumentType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "invoice" => DocumentType::Invoice,
            "payment" => DocumentType::Payment,
            "statement" => DocumentType::Statement,
            "order_guide" => DocumentType::OrderGuide,
            "po" => DocumentType::Po,
            _ => DocumentType::Unknown,
        }
    }
}

impl From<DocumentType> for String {
    fn from(dt: DocumentType) -> Self {
        dt.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::parse(op.as_str()).unwrap(), *op);
        }
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let err = Operation::parse("fax.send").unwrap_err();
        assert_eq!(err.to_string(), "Unsupported operation: fax.send");
    }

    #[test]
    fn test_accounting_capability_expansion() {
        let implied = Operation::AccountingImportMultipleEntities.implied();
        assert!(implied.contains(&Operation::VendorImportList));
        assert!(implied.contains(&Operation::GlImportList));
        assert!(implied.contains(&Operation::BankAccountImportList));
        assert_eq!(Operation::InvoiceDownload.implied(), &[Operation::InvoiceDownload]);
    }
}
