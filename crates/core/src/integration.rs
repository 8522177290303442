//! Integration domain enums mapping to TEXT columns.
//!
//! Each enum's string form matches the values stored in the `integrations`,
//! `integration_field_mappings`, `integration_sync_log` and
//! `webhook_deliveries` tables.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

macro_rules! define_text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Return the database string form.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $val ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $val => Ok($name::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        "Unknown {} '{other}'",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

define_text_enum! {
    /// External system family an integration talks to.
    IntegrationType {
        GoogleSheets = "google_sheets",
        ExcelOneDrive = "excel_onedrive",
        ExcelSharePoint = "excel_sharepoint",
        Dynamics365 = "dynamics_365",
        Salesforce = "salesforce",
        HubSpot = "hubspot",
    }
}

define_text_enum! {
    /// Integration lifecycle status.
    IntegrationStatus {
        Connected = "connected",
        Syncing = "syncing",
        Error = "error",
        Disconnected = "disconnected",
    }
}

define_text_enum! {
    /// Which way data flows for an integration or a single field mapping.
    SyncDirection {
        Inbound = "inbound",
        Outbound = "outbound",
        Bidirectional = "bidirectional",
    }
}

define_text_enum! {
    /// How a sync run was initiated.
    SyncType {
        Full = "full",
        Incremental = "incremental",
        Manual = "manual",
    }
}

define_text_enum! {
    /// Sync run status. `Started` is the only non-terminal value.
    SyncRunStatus {
        Started = "started",
        Completed = "completed",
        Partial = "partial",
        Failed = "failed",
    }
}

define_text_enum! {
    /// Webhook delivery attempt status.
    DeliveryStatus {
        Pending = "pending",
        Delivered = "delivered",
        Failed = "failed",
    }
}

define_text_enum! {
    /// OAuth authorization server family. One callback endpoint per family.
    OAuthProviderKind {
        Google = "google",
        Microsoft = "microsoft",
        Salesforce = "salesforce",
        HubSpot = "hubspot",
    }
}

/// Broad category deciding how the sync engine writes outbound changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationCategory {
    Spreadsheet,
    Crm,
}

impl IntegrationType {
    pub fn category(self) -> IntegrationCategory {
        match self {
            IntegrationType::GoogleSheets
            | IntegrationType::ExcelOneDrive
            | IntegrationType::ExcelSharePoint => IntegrationCategory::Spreadsheet,
            IntegrationType::Dynamics365
            | IntegrationType::Salesforce
            | IntegrationType::HubSpot => IntegrationCategory::Crm,
        }
    }

    /// The OAuth family whose callback completes this integration type.
    pub fn oauth_provider(self) -> OAuthProviderKind {
        match self {
            IntegrationType::GoogleSheets => OAuthProviderKind::Google,
            IntegrationType::ExcelOneDrive
            | IntegrationType::ExcelSharePoint
            | IntegrationType::Dynamics365 => OAuthProviderKind::Microsoft,
            IntegrationType::Salesforce => OAuthProviderKind::Salesforce,
            IntegrationType::HubSpot => OAuthProviderKind::HubSpot,
        }
    }
}

impl SyncDirection {
    pub fn includes_inbound(self) -> bool {
        matches!(self, SyncDirection::Inbound | SyncDirection::Bidirectional)
    }

    pub fn includes_outbound(self) -> bool {
        matches!(self, SyncDirection::Outbound | SyncDirection::Bidirectional)
    }
}

impl SyncRunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SyncRunStatus::Started)
    }
}
