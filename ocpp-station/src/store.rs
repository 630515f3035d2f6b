//! Concurrent station state: EVSE registry, reservations, certificates,
//! display messages, transaction records, variables and the local
//! authorization list.
//!
//! Keyed containers are `DashMap`s so inbound commands touching different
//! keys never contend. Check-then-act sequences use the entry API or
//! `remove_if` so they are atomic per key.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use ocpp_core::payloads::{
    AuthorizationData, AuthorizationStatus, CertificateHashData, CertificateHashDataChain,
    CertificateUse, HashAlgorithm, MessageInfo, StopReason,
};
use ocpp_core::{ConnectorId, EvseId, OcppError, OcppResult, TransactionState};

use crate::config::EvseConfig;
use crate::evse::Evse;

// ============================================================================
// Certificates
// ============================================================================

/// A certificate installed in one usage slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledCertificate {
    pub usage: CertificateUse,
    pub pem: String,
    pub hash_data: CertificateHashData,
}

impl InstalledCertificate {
    /// Parse the first certificate of a PEM bundle.
    pub fn parse(usage: CertificateUse, pem: &str) -> OcppResult<Self> {
        let der = rustls_pemfile::certs(&mut pem.as_bytes())
            .next()
            .ok_or_else(|| OcppError::Certificate("No certificate in PEM".to_string()))?
            .map_err(|e| OcppError::Certificate(format!("Invalid PEM: {}", e)))?;

        let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
            .map_err(|e| OcppError::Certificate(format!("Invalid X.509: {}", e)))?;
        let tbs = &cert.tbs_certificate;

        let hash_data = CertificateHashData {
            hash_algorithm: HashAlgorithm::SHA256,
            issuer_name_hash: hex::encode(Sha256::digest(tbs.issuer.as_raw())),
            issuer_key_hash: hex::encode(Sha256::digest(&*tbs.subject_pki.subject_public_key.data)),
            serial_number: hex::encode(tbs.raw_serial()),
        };

        Ok(Self {
            usage,
            pem: pem.to_string(),
            hash_data,
        })
    }

    pub fn serial_matches(&self, serial: &str) -> bool {
        normalize_serial(&self.hash_data.serial_number) == normalize_serial(serial)
    }
}

/// Hex serial without separators, lowercased, leading zeros dropped.
pub fn normalize_serial(serial: &str) -> String {
    let digits: String = serial
        .chars()
        .filter(|c| *c != ':')
        .flat_map(char::to_lowercase)
        .collect();
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// A transaction run by one EVSE. Never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id: String,
    pub evse_id: EvseId,
    pub state: TransactionState,
    pub remote_start_id: Option<i32>,
    pub meter_start: f64,
    pub meter_stop: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<StopReason>,
    pub total_cost: Option<f64>,
}

// ============================================================================
// Variables
// ============================================================================

/// Component/variable name pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableKey {
    pub component: String,
    pub variable: String,
}

impl VariableKey {
    pub fn new(component: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            variable: variable.into(),
        }
    }
}

#[derive(Debug, Default)]
struct LocalList {
    version: i32,
    entries: HashMap<String, AuthorizationStatus>,
}

// ============================================================================
// Store
// ============================================================================

/// All mutable station state.
pub struct StationStore {
    evses: Vec<Arc<Evse>>,
    evse_index: HashMap<EvseId, Arc<Evse>>,
    reservations: DashSet<i32>,
    certificates: DashMap<CertificateUse, InstalledCertificate>,
    display_messages: DashMap<i32, MessageInfo>,
    transactions: DashMap<String, TransactionRecord>,
    variables: DashMap<VariableKey, String>,
    local_list: Mutex<LocalList>,
}

impl StationStore {
    /// Build the store with a fixed EVSE layout. Duplicate EVSE ids keep
    /// the first occurrence.
    pub fn new(evses: &[EvseConfig]) -> Self {
        let mut ordered = Vec::with_capacity(evses.len());
        let mut evse_index = HashMap::with_capacity(evses.len());
        for config in evses {
            if evse_index.contains_key(&config.id) {
                tracing::warn!(evse = %config.id, "duplicate EVSE id ignored");
                continue;
            }
            let evse = Arc::new(Evse::new(config.id.clone(), config.connectors.clone()));
            evse_index.insert(config.id.clone(), Arc::clone(&evse));
            ordered.push(evse);
        }

        Self {
            evses: ordered,
            evse_index,
            reservations: DashSet::new(),
            certificates: DashMap::new(),
            display_messages: DashMap::new(),
            transactions: DashMap::new(),
            variables: DashMap::new(),
            local_list: Mutex::new(LocalList::default()),
        }
    }

    // ----- EVSEs -----

    pub fn evse(&self, id: &EvseId) -> Option<Arc<Evse>> {
        self.evse_index.get(id).cloned()
    }

    /// EVSEs in configuration order.
    pub fn evses(&self) -> &[Arc<Evse>] {
        &self.evses
    }

    /// The EVSE owning `connector`, if both exist.
    pub fn connector(&self, evse: &EvseId, connector: ConnectorId) -> Option<Arc<Evse>> {
        self.evse(evse).filter(|e| e.has_connector(connector))
    }

    /// EVSE currently bound to a transaction id.
    pub fn evse_by_transaction(&self, transaction_id: &str) -> Option<Arc<Evse>> {
        self.evses
            .iter()
            .find(|e| e.lock().transaction_id.as_deref() == Some(transaction_id))
            .cloned()
    }

    // ----- Reservations -----

    /// Returns false if the id is already reserved.
    pub fn insert_reservation(&self, id: i32) -> bool {
        self.reservations.insert(id)
    }

    /// Returns whether the id was present.
    pub fn remove_reservation(&self, id: i32) -> bool {
        self.reservations.remove(&id).is_some()
    }

    pub fn has_reservation(&self, id: i32) -> bool {
        self.reservations.contains(&id)
    }

    // ----- Certificates -----

    /// Install into the certificate's usage slot, replacing any previous one.
    pub fn upsert_certificate(&self, certificate: InstalledCertificate) -> Option<InstalledCertificate> {
        self.certificates.insert(certificate.usage, certificate)
    }

    /// Remove the certificate whose serial matches. Returns whether one was removed.
    pub fn remove_certificate_by_serial(&self, serial: &str) -> bool {
        let candidates: Vec<CertificateUse> = self
            .certificates
            .iter()
            .filter(|entry| entry.value().serial_matches(serial))
            .map(|entry| *entry.key())
            .collect();

        candidates.into_iter().any(|usage| {
            self.certificates
                .remove_if(&usage, |_, cert| cert.serial_matches(serial))
                .is_some()
        })
    }

    pub fn certificate(&self, usage: CertificateUse) -> Option<InstalledCertificate> {
        self.certificates.get(&usage).map(|c| c.value().clone())
    }

    /// Hash chains of installed certificates, optionally narrowed to usages.
    pub fn certificate_hashes(&self, usages: &[CertificateUse]) -> Vec<CertificateHashDataChain> {
        self.certificates
            .iter()
            .filter(|entry| usages.is_empty() || usages.contains(entry.key()))
            .map(|entry| CertificateHashDataChain {
                certificate_type: *entry.key(),
                certificate_hash_data: entry.value().hash_data.clone(),
            })
            .collect()
    }

    // ----- Display messages -----

    /// First writer wins: returns false if the id is already present.
    pub fn insert_display_message(&self, message: MessageInfo) -> bool {
        match self.display_messages.entry(message.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(message);
                true
            }
        }
    }

    pub fn display_message(&self, id: i32) -> Option<MessageInfo> {
        self.display_messages.get(&id).map(|m| m.value().clone())
    }

    /// Compare-and-delete against the caller's prior view of the message.
    pub fn remove_display_message(&self, id: i32, expected: &MessageInfo) -> bool {
        self.display_messages
            .remove_if(&id, |_, current| current == expected)
            .is_some()
    }

    /// Messages accepted by `filter`, ordered by id.
    pub fn display_messages<F>(&self, filter: F) -> Vec<MessageInfo>
    where
        F: Fn(&MessageInfo) -> bool,
    {
        let mut messages: Vec<MessageInfo> = self
            .display_messages
            .iter()
            .filter(|m| filter(m.value()))
            .map(|m| m.value().clone())
            .collect();
        messages.sort_by_key(|m| m.id);
        messages
    }

    // ----- Transactions -----

    pub fn insert_transaction(&self, record: TransactionRecord) {
        self.transactions.insert(record.id.clone(), record);
    }

    pub fn transaction(&self, id: &str) -> Option<TransactionRecord> {
        self.transactions.get(id).map(|t| t.value().clone())
    }

    /// Move a transaction to Ended and record its stop data.
    pub fn finish_transaction(
        &self,
        id: &str,
        meter_stop: f64,
        stopped_at: DateTime<Utc>,
        reason: StopReason,
    ) -> OcppResult<TransactionRecord> {
        let mut record = self
            .transactions
            .get_mut(id)
            .ok_or_else(|| OcppError::domain(format!("unknown transaction {}", id)))?;

        if !record.state.can_transition_to(TransactionState::Ended) {
            return Err(OcppError::Protocol(format!(
                "Invalid transaction transition: {:?} -> {:?}",
                record.state,
                TransactionState::Ended
            )));
        }
        record.state = TransactionState::Ended;
        record.meter_stop = Some(meter_stop);
        record.stopped_at = Some(stopped_at);
        record.stop_reason = Some(reason);
        Ok(record.clone())
    }

    /// Overwrite the running total of a known transaction.
    pub fn update_cost(&self, id: &str, total_cost: f64) -> OcppResult<()> {
        match self.transactions.get_mut(id) {
            Some(mut record) => {
                record.total_cost = Some(total_cost);
                Ok(())
            }
            None => Err(OcppError::domain(format!("unknown transaction {}", id))),
        }
    }

    // ----- Variables -----

    pub fn insert_variable(&self, key: VariableKey, value: impl Into<String>) {
        self.variables.insert(key, value.into());
    }

    pub fn variable(&self, key: &VariableKey) -> Option<String> {
        self.variables.get(key).map(|v| v.value().clone())
    }

    /// Overwrite a known variable. Returns false if the variable is unknown.
    pub fn set_variable(&self, key: &VariableKey, value: impl Into<String>) -> bool {
        match self.variables.get_mut(key) {
            Some(mut current) => {
                *current = value.into();
                true
            }
            None => false,
        }
    }

    // ----- Local authorization list -----

    pub fn local_list_version(&self) -> i32 {
        self.local_list.lock().version
    }

    pub fn local_authorization(&self, id_token: &str) -> Option<AuthorizationStatus> {
        self.local_list.lock().entries.get(id_token).copied()
    }

    /// Replace the whole list.
    pub fn replace_local_list(&self, version: i32, entries: &[AuthorizationData]) {
        let mut list = self.local_list.lock();
        list.entries.clear();
        apply_entries(&mut list.entries, entries);
        list.version = version;
    }

    /// Apply a differential update. Returns false if `version` is not
    /// newer than the current one.
    pub fn update_local_list(&self, version: i32, entries: &[AuthorizationData]) -> bool {
        let mut list = self.local_list.lock();
        if version <= list.version {
            return false;
        }
        apply_entries(&mut list.entries, entries);
        list.version = version;
        true
    }
}

/// Entries without token info are removals.
fn apply_entries(target: &mut HashMap<String, AuthorizationStatus>, entries: &[AuthorizationData]) {
    for entry in entries {
        match &entry.id_token_info {
            Some(info) => {
                target.insert(entry.id_token.id_token.clone(), info.status);
            }
            None => {
                target.remove(&entry.id_token.id_token);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use ocpp_core::payloads::{IdToken, IdTokenInfo, MessageContent, MessageFormat, MessagePriority};

    fn store() -> StationStore {
        StationStore::new(&[
            EvseConfig::new("1", [1]),
            EvseConfig::new("2", [1, 2]),
            EvseConfig::new("1", [9]),
        ])
    }

    fn message(id: i32, content: &str) -> MessageInfo {
        MessageInfo {
            id,
            priority: MessagePriority::NormalCycle,
            state: None,
            message: MessageContent {
                format: MessageFormat::UTF8,
                language: None,
                content: content.to_string(),
            },
            transaction_id: None,
        }
    }

    #[test]
    fn evse_lookup() {
        let store = store();
        assert_eq!(store.evses().len(), 2);
        assert!(store.evse(&EvseId::from("2")).is_some());
        assert!(store.evse(&EvseId::from("unknown")).is_none());
        assert!(store.connector(&EvseId::from("2"), 2).is_some());
        assert!(store.connector(&EvseId::from("1"), 9).is_none());
    }

    #[test]
    fn reservations_are_a_set() {
        let store = store();
        assert!(store.insert_reservation(7));
        assert!(!store.insert_reservation(7));
        assert!(store.remove_reservation(7));
        assert!(!store.remove_reservation(7));
    }

    #[test]
    fn display_message_first_writer_wins() {
        let store = store();
        assert!(store.insert_display_message(message(1, "hello")));
        assert!(!store.insert_display_message(message(1, "other")));
        assert_eq!(store.display_message(1).unwrap().message.content, "hello");
    }

    #[test]
    fn display_message_compare_and_delete() {
        let store = store();
        store.insert_display_message(message(1, "hello"));

        assert!(!store.remove_display_message(1, &message(1, "stale")));
        assert!(store.display_message(1).is_some());

        let current = store.display_message(1).unwrap();
        assert!(store.remove_display_message(1, &current));
        assert!(store.display_message(1).is_none());
    }

    #[test]
    fn cost_update_requires_known_transaction() {
        let store = store();
        let err = store.update_cost("nope", 1.0).unwrap_err();
        assert!(matches!(err, OcppError::Rejected { .. }));

        store.insert_transaction(TransactionRecord {
            id: "tx".to_string(),
            evse_id: EvseId::from("1"),
            state: TransactionState::Started,
            remote_start_id: None,
            meter_start: 0.0,
            meter_stop: None,
            started_at: Utc::now(),
            stopped_at: None,
            stop_reason: None,
            total_cost: None,
        });
        store.update_cost("tx", 12.5).unwrap();
        assert_eq!(store.transaction("tx").unwrap().total_cost, Some(12.5));

        store
            .finish_transaction("tx", 100.0, Utc::now(), StopReason::Remote)
            .unwrap();
        assert!(store
            .finish_transaction("tx", 100.0, Utc::now(), StopReason::Remote)
            .is_err());
    }

    #[test]
    fn serial_normalization() {
        assert_eq!(normalize_serial("00:1A:2b"), "1a2b");
        assert_eq!(normalize_serial("001a2b"), "1a2b");
        assert_eq!(normalize_serial("000"), "0");
    }

    #[test]
    fn certificate_install_and_delete_by_serial() {
        let store = store();
        let pem = testkit::certificate_pem(vec![0x1a, 0x2b]);
        let cert = InstalledCertificate::parse(CertificateUse::CSMSRootCertificate, &pem).unwrap();
        assert_eq!(normalize_serial(&cert.hash_data.serial_number), "1a2b");
        assert_eq!(cert.hash_data.issuer_name_hash.len(), 64);

        store.upsert_certificate(cert);
        assert_eq!(store.certificate_hashes(&[]).len(), 1);
        assert!(store
            .certificate_hashes(&[CertificateUse::V2GRootCertificate])
            .is_empty());

        assert!(!store.remove_certificate_by_serial("ffff"));
        assert!(store.remove_certificate_by_serial("001A2B"));
        assert!(store.certificate(CertificateUse::CSMSRootCertificate).is_none());
    }

    #[test]
    fn unparseable_certificate() {
        let err = InstalledCertificate::parse(CertificateUse::MORootCertificate, "not a pem");
        assert!(matches!(err, Err(OcppError::Certificate(_))));
    }

    #[test]
    fn local_list_versions() {
        let store = store();
        let entry = |token: &str, status: Option<AuthorizationStatus>| AuthorizationData {
            id_token: IdToken {
                id_token: token.to_string(),
                token_type: "ISO14443".to_string(),
            },
            id_token_info: status.map(|status| IdTokenInfo { status }),
        };

        store.replace_local_list(3, &[entry("A", Some(AuthorizationStatus::Accepted))]);
        assert_eq!(store.local_list_version(), 3);

        assert!(!store.update_local_list(3, &[entry("B", Some(AuthorizationStatus::Blocked))]));
        assert!(store.update_local_list(4, &[entry("A", None), entry("B", Some(AuthorizationStatus::Blocked))]));
        assert_eq!(store.local_authorization("A"), None);
        assert_eq!(store.local_authorization("B"), Some(AuthorizationStatus::Blocked));
    }

    #[test]
    fn variables_only_update_known_keys() {
        let store = store();
        let key = VariableKey::new("HeartbeatCtrlr", "Interval");
        assert!(!store.set_variable(&key, "10"));
        store.insert_variable(key.clone(), "30");
        assert!(store.set_variable(&key, "10"));
        assert_eq!(store.variable(&key).as_deref(), Some("10"));
    }
}
