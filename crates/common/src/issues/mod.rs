//! Issue taxonomy for adapter failures
//!
//! Adapters surface failures as an [`Issue`]: a stable wire code in the
//! `intgrt.*` namespace, a message rendered from a per-code template, and a
//! params bag. The executor persists the issue onto the failing run.
//!
//! Please make sure to add entries in an alphabetical order per family.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Wire-stable failure codes raised by adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueCode {
    // Authentication
    AccountDisabledWeb,
    AuthenticationFailedFtp,
    AuthenticationFailedWeb,

    // Authorization / configuration
    UserPermissionInvoiceNotEnrolled,
    CommonUnsupportedOperation,

    // External availability
    ExternalUpstreamUnavailable,
    WebsiteUnderMaintenance,

    // Payment export
    PeBankAccountNotFound,
    PeBankAccountSelectionFailed,
    PeCheckrunAlreadyExists,
    PeDuplicateTxnFound,
    PeFiscalPeriodNotSet,
    PeInsufficientPermissions,
    PeInvalidDiscoveredFile,
    PeInvoiceAlreadyPaid,
    PeInvoiceNotApproved,
    PeInvoiceNotFound,
    PeInvoiceSelectionFailed,
    PeLocationNotFound,
    PeLocationSelectionFailed,
    PePaymentAmountNegative,
    PePaymentConflict,
    PeResponseValidationFailed,
    PeValidationAmountMismatch,
    PeVendorNotFound,
    PeVendorSelectionFailed,

    // Vendor payment
    VpInvoiceSelectionFailed,
    VpInvoiceVcardAmountMismatch,
}

impl IssueCode {
    /// Stable wire code
    pub fn code(&self) -> &'static str {
        match self {
            IssueCode::AccountDisabledWeb => "intgrt.account_disabled.web",
            IssueCode::AuthenticationFailedFtp => "intgrt.auth_failed.ftp",
            IssueCode::AuthenticationFailedWeb => "intgrt.auth_failed.web",
            IssueCode::UserPermissionInvoiceNotEnrolled => "intgrt.permission.invoice_not_enrolled",
            IssueCode::CommonUnsupportedOperation => "intgrt.common.unsupported_operation",
            IssueCode::ExternalUpstreamUnavailable => "intgrt.external.upstream_unavailable",
            IssueCode::WebsiteUnderMaintenance => "intgrt.external.website_under_maintenance",
            IssueCode::PeBankAccountNotFound => "intgrt.payment_export.bank_account_not_found",
            IssueCode::PeBankAccountSelectionFailed => {
                "intgrt.payment_export.bank_account_selection_failed"
            }
            IssueCode::PeCheckrunAlreadyExists => "intgrt.payment_export.checkrun_already_exists",
            IssueCode::PeDuplicateTxnFound => "intgrt.payment_export.duplicate_txn_found",
            IssueCode::PeFiscalPeriodNotSet => "intgrt.payment_export.fiscal_period_not_set",
            IssueCode::PeInsufficientPermissions => {
                "intgrt.payment_export.insufficient_permissions"
            }
            IssueCode::PeInvalidDiscoveredFile => "intgrt.payment_export.invalid_discovered_file",
            IssueCode::PeInvoiceAlreadyPaid => "intgrt.payment_export.invoice_already_paid",
            IssueCode::PeInvoiceNotApproved => "intgrt.payment_export.invoice_not_approved",
            IssueCode::PeInvoiceNotFound => "intgrt.payment_export.invoice_not_found",
            IssueCode::PeInvoiceSelectionFailed => {
                "intgrt.payment_export.invoice_selection_failed"
            }
            IssueCode::PeLocationNotFound => "intgrt.payment_export.location_not_found",
            IssueCode::PeLocationSelectionFailed => {
                "intgrt.payment_export.location_selection_failed"
            }
            IssueCode::PePaymentAmountNegative => "intgrt.payment_export.payment_amount_negative",
            IssueCode::PePaymentConflict => "intgrt.payment_export.payment_conflict",
            IssueCode::PeResponseValidationFailed => {
                "intgrt.payment_export.response_validation_failed"
            }
            IssueCode::PeValidationAmountMismatch => {
                "intgrt.payment_export.validation.amount_mismatch"
            }
            IssueCode::PeVendorNotFound => "intgrt.payment_export.vendor_not_found",
            IssueCode::PeVendorSelectionFailed => "intgrt.payment_export.vendor_selection_failed",
            IssueCode::VpInvoiceSelectionFailed => "intgrt.vendor_payment.invoice_selection_failed",
            IssueCode::VpInvoiceVcardAmountMismatch => {
                "intgrt.vendor_payment.invoice_vcard_amount_mismatch"
            }
        }
    }

    /// Message template; `{name}` placeholders are filled from the params bag
    pub fn template(&self) -> &'static str {
        match self {
            IssueCode::AccountDisabledWeb => {
                "Account is disabled, please check activate the account (username: {username})"
            }
            IssueCode::AuthenticationFailedFtp => {
                "Authentication failed, please check FTP credentials"
            }
            IssueCode::AuthenticationFailedWeb => {
                "Website login failed, please check login credentials (username: {username})"
            }
            IssueCode::UserPermissionInvoiceNotEnrolled => {
                "Invoices are not available, please check if user is enrolled for e-invoices"
            }
            IssueCode::CommonUnsupportedOperation => "This operation is not supported",
            IssueCode::ExternalUpstreamUnavailable => {
                "Could not connect because website was unavailable"
            }
            IssueCode::WebsiteUnderMaintenance => {
                "Could not connect because website is under maintenance"
            }
            IssueCode::PeBankAccountNotFound => {
                "Specified bank account '{bank_account}' was not found"
            }
            IssueCode::PeBankAccountSelectionFailed => {
                "Something went wrong while selecting bank account '{bank_account}'"
            }
            IssueCode::PeCheckrunAlreadyExists => {
                "Specified payment '{payment_number}' has already been exported via Plate IQ"
            }
            IssueCode::PeDuplicateTxnFound => {
                "We found another payment that looked similar to this one {prefix_number}, {amount}. \
                 In order to avoid duplicates, we did not export this payment. \
                 Please export manually or contact support."
            }
            IssueCode::PeFiscalPeriodNotSet => "Fiscal period not set",
            IssueCode::PeInsufficientPermissions => {
                "The provided user {username} might have insufficient permissions"
            }
            IssueCode::PeInvalidDiscoveredFile => {
                "To download invoices, found invalid discovered file."
            }
            IssueCode::PeInvoiceAlreadyPaid => {
                "One or more invoices have already been paid: {invoice_numbers}"
            }
            IssueCode::PeInvoiceNotApproved => {
                "One or more invoices were not approved: {invoice_numbers}."
            }
            IssueCode::PeInvoiceNotFound => {
                "One or more invoices were not found: {invoice_numbers}. This can mean that the \
                 invoice was not exported to the accounting system, or it has already been marked \
                 as paid manually directly in the accounting system. If the payment has already \
                 been added manually by you or your teammates, you can mark the payment as \
                 exported in Plate IQ."
            }
            IssueCode::PeInvoiceSelectionFailed => {
                "Something went wrong while selecting invoices for payment"
            }
            IssueCode::PeLocationNotFound => {
                "Specified location name '{location_name}' was not found"
            }
            IssueCode::PeLocationSelectionFailed => {
                "Something went wrong while selecting location {location_name}"
            }
            IssueCode::PePaymentAmountNegative => {
                "Exports for negative payments are not supported. Please change the payment or \
                 export the payment manually."
            }
            IssueCode::PePaymentConflict => {
                "Specified payment '{payment_number}' already exists in accounting system"
            }
            IssueCode::PeResponseValidationFailed => "Payment export failed: {error_message}",
            IssueCode::PeValidationAmountMismatch => {
                "There was a mismatch between the payment amount and selected invoices total"
            }
            IssueCode::PeVendorNotFound => "Specified vendor name '{vendor_name}' was not found",
            IssueCode::PeVendorSelectionFailed => {
                "Something went wrong while selecting vendor {vendor_name}"
            }
            IssueCode::VpInvoiceSelectionFailed => {
                "No invoice with given invoice id found : {invoice_id}"
            }
            IssueCode::VpInvoiceVcardAmountMismatch => {
                "Card limit amount and invoice due amount does not match {invoice_id}"
            }
        }
    }

    /// Whether this issue indicates a credential problem on the job
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            IssueCode::AuthenticationFailedWeb
                | IssueCode::AuthenticationFailedFtp
                | IssueCode::AccountDisabledWeb
        )
    }

    /// Build an issue with no params
    pub fn issue(self) -> Issue {
        Issue::new(self, BTreeMap::new())
    }

    /// Build an issue with the given params
    pub fn with_params(self, params: BTreeMap<String, String>) -> Issue {
        Issue::new(self, params)
    }

    /// Build an issue with a single param
    pub fn with_param(self, key: &str, value: impl Into<String>) -> Issue {
        let mut params = BTreeMap::new();
        params.insert(key.to_string(), value.into());
        Issue::new(self, params)
    }
}

impl Serialize for IssueCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for IssueCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        IssueCode::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown issue code: {}", s)))
    }
}

impl IssueCode {
    /// Parse a wire code back into the enum
    pub fn parse(s: &str) -> Option<Self> {
        const ALL: &[IssueCode] = &[
            IssueCode::AccountDisabledWeb,
            IssueCode::AuthenticationFailedFtp,
            IssueCode::AuthenticationFailedWeb,
            IssueCode::UserPermissionInvoiceNotEnrolled,
            IssueCode::CommonUnsupportedOperation,
            IssueCode::ExternalUpstreamUnavailable,
            IssueCode::WebsiteUnderMaintenance,
            IssueCode::PeBankAccountNotFound,
            IssueCode::PeBankAccountSelectionFailed,
            IssueCode::PeCheckrunAlreadyExists,
            IssueCode::PeDuplicateTxnFound,
            IssueCode::PeFiscalPeriodNotSet,
            IssueCode::PeInsufficientPermissions,
            IssueCode::PeInvalidDiscoveredFile,
            IssueCode::PeInvoiceAlreadyPaid,
            IssueCode::PeInvoiceNotApproved,
            IssueCode::PeInvoiceNotFound,
            IssueCode::PeInvoiceSelectionFailed,
            IssueCode::PeLocationNotFound,
            IssueCode::PeLocationSelectionFailed,
            IssueCode::PePaymentAmountNegative,
            IssueCode::PePaymentConflict,
            IssueCode::PeResponseValidationFailed,
            IssueCode::PeValidationAmountMismatch,
            IssueCode::PeVendorNotFound,
            IssueCode::PeVendorSelectionFailed,
            IssueCode::VpInvoiceSelectionFailed,
            IssueCode::VpInvoiceVcardAmountMismatch,
        ];
        ALL.iter().copied().find(|c| c.code() == s)
    }
}

/// A contextual failure recorded on a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub code: IssueCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl Issue {
    pub fn new(code: IssueCode, params: BTreeMap<String, String>) -> Self {
        let message = render_template(code.template(), &params);
        Self { code, message, params }
    }

    /// Serialize to the JSON shape stored in `runs.failure_issue`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code.code(),
            "message": self.message,
            "params": self.params,
        })
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

/// Fill `{name}` placeholders from the params bag. Unknown placeholders are
/// left in place so a truncated params bag still yields a readable message.
fn render_template(template: &str, params: &BTreeMap<String, String>) -> String {
    let mut message = template.to_string();
    for (key, value) in params {
        message = message.replace(&format!("{{{}}}", key), value);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failed_web_message() {
        let issue = IssueCode::AuthenticationFailedWeb.with_param("username", "jdoe");
        assert_eq!(issue.code.code(), "intgrt.auth_failed.web");
        assert_eq!(
            issue.message,
            "Website login failed, please check login credentials (username: jdoe)"
        );
        assert!(issue.code.is_credential_failure());
    }

    #[test]
    fn test_params_left_in_place_when_missing() {
        let issue = IssueCode::PeVendorNotFound.issue();
        assert_eq!(
            issue.message,
            "Specified vendor name '{vendor_name}' was not found"
        );
    }

    #[test]
    fn test_code_round_trip() {
        let issue = IssueCode::PeDuplicateTxnFound
            .with_params(BTreeMap::from([
                ("prefix_number".to_string(), "CHK-12".to_string()),
                ("amount".to_string(), "140.50".to_string()),
            ]));
        let json = serde_json::to_string(&issue).unwrap();
        let parsed: Issue = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.code, IssueCode::PeDuplicateTxnFound);
        assert!(parsed.message.contains("CHK-12, 140.50"));
    }

    #[test]
    fn test_non_credential_codes() {
        assert!(!IssueCode::WebsiteUnderMaintenance.is_credential_failure());
        assert!(!IssueCode::PeInvoiceNotFound.is_credential_failure());
    }
}
