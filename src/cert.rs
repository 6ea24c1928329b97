// CertificateBuilder - signed, hash-chained proof of erasure.
//
// The certificate is the product the whole pipeline exists to defend. Its
// content hash is computed over a canonical JSON encoding (recursively sorted
// keys, compact separators) with the hash and signature fields excluded, so
// any later field change invalidates the signature. Certificates for the same
// device chain through `prior_certificate_hash` into an append-only audit
// trail. A signed certificate is never mutated; derived artifacts (text
// report, exports) are produced from it instead.

use crate::crypto::{sha256_hex, SignatureScheme, Signer};
use crate::dispatch::{PassOutcome, PassResult};
use crate::hidden::HiddenAreaReport;
use crate::safety::DecisionRecord;
use crate::verify::{VerdictClass, VerificationVerdict};
use crate::{Device, WipeError, WipeRequest, WipeResult, WipeState};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const ENGINE_NAME: &str = "veriwipe";
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineIdentity {
    pub name: String,
    pub version: String,
}

impl Default for EngineIdentity {
    fn default() -> Self {
        Self {
            name: ENGINE_NAME.to_string(),
            version: ENGINE_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub path: String,
    pub model: String,
    pub serial: String,
    pub capacity_bytes: u64,
    pub media_class: crate::MediaClass,
    /// SHA-256 over model, serial and capacity; stable identity for chain
    /// lookups even when the platform path changes between sessions.
    pub device_hash: String,
}

impl DeviceIdentity {
    pub fn from_device(device: &Device) -> Self {
        let mut identity = Vec::new();
        identity.extend_from_slice(device.model.as_bytes());
        identity.extend_from_slice(device.serial.as_bytes());
        identity.extend_from_slice(&device.capacity_bytes().to_le_bytes());
        Self {
            path: device.path.clone(),
            model: device.model.clone(),
            serial: device.serial.clone(),
            capacity_bytes: device.capacity_bytes(),
            media_class: device.media_class,
            device_hash: sha256_hex(&identity),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSummary {
    pub method: String,
    pub sanitization_category: String,
    pub passes: u32,
    pub verify: bool,
    pub remove_hidden_areas: bool,
    pub tolerate_pass_failure: bool,
    pub operator_id: Option<String>,
}

impl RequestSummary {
    pub fn from_request(request: &WipeRequest) -> Self {
        Self {
            method: request.method.to_string(),
            sanitization_category: request.method.sanitization_category().to_string(),
            passes: request.passes,
            verify: request.verify,
            remove_hidden_areas: request.remove_hidden_areas,
            tolerate_pass_failure: request.tolerate_pass_failure,
            operator_id: request.operator_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub scheme: SignatureScheme,
    pub value: String,
    /// Present for asymmetric schemes so third parties can verify.
    pub public_key: Option<String>,
}

/// The signed record. Immutable after `CertificateBuilder::build`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub certificate_id: String,
    pub engine: EngineIdentity,
    pub timestamp: DateTime<Utc>,
    pub device: DeviceIdentity,
    pub request: RequestSummary,
    pub safety_decision: DecisionRecord,
    pub hidden_before: Option<HiddenAreaReport>,
    pub hidden_after: Option<HiddenAreaReport>,
    pub pass_results: Vec<PassResult>,
    pub verdict: Option<VerificationVerdict>,
    /// Terminal state of the operation this certificate attests to.
    pub state: WipeState,
    /// True only when every planned pass succeeded and verification (if
    /// requested) passed. An INCOMPLETE certificate never claims verified
    /// erasure.
    pub complete: bool,
    pub warnings: Vec<String>,
    pub prior_certificate_hash: Option<String>,
    pub content_hash: String,
    pub signature: SignatureRecord,
}

/// Everything the orchestrator hands over for certification.
pub struct CertificateDraft {
    pub request: RequestSummary,
    pub device: DeviceIdentity,
    pub safety_decision: DecisionRecord,
    pub hidden_before: Option<HiddenAreaReport>,
    pub hidden_after: Option<HiddenAreaReport>,
    pub pass_results: Vec<PassResult>,
    pub verdict: Option<VerificationVerdict>,
    pub state: WipeState,
    pub warnings: Vec<String>,
    pub prior_certificate_hash: Option<String>,
}

pub struct CertificateBuilder {
    signer: Signer,
    engine: EngineIdentity,
}

impl CertificateBuilder {
    pub fn new(signer: Signer) -> Self {
        Self {
            signer,
            engine: EngineIdentity::default(),
        }
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.signer.scheme()
    }

    pub fn build(&self, draft: CertificateDraft) -> WipeResult<Certificate> {
        let complete = draft.state == WipeState::Done
            && !draft.pass_results.is_empty()
            && draft
                .pass_results
                .iter()
                .all(|p| p.outcome == PassOutcome::Success)
            && match (&draft.verdict, draft.request.verify) {
                (Some(v), _) => v.classification == VerdictClass::Pass,
                (None, true) => false,
                // Verification explicitly opted out by the caller
                (None, false) => true,
            };

        let mut certificate = Certificate {
            certificate_id: Uuid::new_v4().to_string(),
            engine: self.engine.clone(),
            timestamp: crate::now_utc(),
            device: draft.device,
            request: draft.request,
            safety_decision: draft.safety_decision,
            hidden_before: draft.hidden_before,
            hidden_after: draft.hidden_after,
            pass_results: draft.pass_results,
            verdict: draft.verdict,
            state: draft.state,
            complete,
            warnings: draft.warnings,
            prior_certificate_hash: draft.prior_certificate_hash,
            content_hash: String::new(),
            signature: SignatureRecord {
                scheme: self.signer.scheme(),
                value: String::new(),
                public_key: self.signer.public_key_hex(),
            },
        };

        certificate.content_hash = content_hash(&certificate)?;
        certificate.signature.value =
            self.signer.sign(certificate.content_hash.as_bytes()).map_err(|e| {
                error!("certificate signing failed: {}", e);
                e
            })?;
        Ok(certificate)
    }

    /// Recompute the content hash from the certificate's fields and check the
    /// signature against it. Any altered field makes this fail.
    pub fn verify(&self, certificate: &Certificate) -> WipeResult<bool> {
        let expected = content_hash(certificate)?;
        if expected != certificate.content_hash {
            return Ok(false);
        }
        Ok(self
            .signer
            .verify(certificate.content_hash.as_bytes(), &certificate.signature.value))
    }
}

/// Content hash over the canonical encoding, excluding the hash and signature
/// fields themselves.
pub fn content_hash(certificate: &Certificate) -> WipeResult<String> {
    let mut value = serde_json::to_value(certificate)
        .map_err(|e| WipeError::CertificateSigningFailed(e.to_string()))?;
    if let Value::Object(ref mut map) = value {
        map.remove("content_hash");
        map.remove("signature");
    }
    let mut payload = String::new();
    canonicalize(&value, &mut payload);
    Ok(sha256_hex(payload.as_bytes()))
}

/// Canonical JSON: recursively sorted object keys, compact separators. Keeps
/// the hash independent of field ordering quirks in any later serializer.
fn canonicalize(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                canonicalize(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Check that `certificates` forms a valid per-device audit chain: each entry
/// links to the content hash of its predecessor.
pub fn verify_chain(certificates: &[Certificate]) -> WipeResult<()> {
    for window in certificates.windows(2) {
        let (prev, next) = (&window[0], &window[1]);
        match next.prior_certificate_hash {
            Some(ref linked) if linked == &prev.content_hash => {}
            Some(ref linked) => {
                return Err(WipeError::CertificateSigningFailed(format!(
                    "chain break: {} links to {} but predecessor is {}",
                    next.certificate_id, linked, prev.content_hash
                )))
            }
            None => {
                return Err(WipeError::CertificateSigningFailed(format!(
                    "chain break: {} has no prior-certificate link",
                    next.certificate_id
                )))
            }
        }
    }
    Ok(())
}

/// Persist a certificate as JSON. Every field round-trips.
pub fn save_certificate(certificate: &Certificate, path: &str) -> WipeResult<()> {
    let json = serde_json::to_string_pretty(certificate)
        .map_err(|e| WipeError::CertificateSigningFailed(e.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn load_certificate(path: &str) -> WipeResult<Certificate> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json)
        .map_err(|e| WipeError::CertificateSigningFailed(format!("malformed certificate: {}", e)))
}

/// Derived plain-text summary. Never feeds back into the signed record.
pub fn render_text_report(certificate: &Certificate) -> String {
    let mut report = String::new();
    let line = "-".repeat(72);

    report.push_str(&format!(
        "MEDIA SANITIZATION CERTIFICATE\n{}\n",
        line
    ));
    report.push_str(&format!("Certificate ID:   {}\n", certificate.certificate_id));
    report.push_str(&format!(
        "Issued:           {}\n",
        certificate.timestamp.to_rfc3339()
    ));
    report.push_str(&format!(
        "Engine:           {} {}\n",
        certificate.engine.name, certificate.engine.version
    ));
    report.push_str(&format!("\nDEVICE\n{}\n", line));
    report.push_str(&format!("Path:             {}\n", certificate.device.path));
    report.push_str(&format!("Model:            {}\n", certificate.device.model));
    report.push_str(&format!("Serial:           {}\n", certificate.device.serial));
    report.push_str(&format!(
        "Capacity:         {} bytes\n",
        certificate.device.capacity_bytes
    ));
    report.push_str(&format!("\nSANITIZATION\n{}\n", line));
    report.push_str(&format!(
        "Method:           {} ({})\n",
        certificate.request.method, certificate.request.sanitization_category
    ));
    report.push_str(&format!(
        "Passes executed:  {}\n",
        certificate.pass_results.len()
    ));
    let elapsed: i64 = certificate
        .pass_results
        .iter()
        .map(|p| (p.ended_at - p.started_at).num_seconds())
        .sum();
    report.push_str(&format!(
        "Duration:         {}\n",
        humantime::format_duration(std::time::Duration::from_secs(elapsed.max(0) as u64))
    ));
    report.push_str(&format!("Terminal state:   {:?}\n", certificate.state));
    report.push_str(&format!(
        "Complete:         {}\n",
        if certificate.complete { "yes" } else { "NO - INCOMPLETE" }
    ));
    match &certificate.verdict {
        Some(v) => {
            report.push_str(&format!(
                "Verification:     {:?} (mean entropy {:.3}, {} pattern match(es))\n",
                v.classification, v.mean_entropy, v.pattern_matches
            ));
        }
        None => report.push_str("Verification:     not performed\n"),
    }
    for warning in &certificate.warnings {
        report.push_str(&format!("Warning:          {}\n", warning));
    }
    report.push_str(&format!("\nINTEGRITY\n{}\n", line));
    report.push_str(&format!("Content hash:     {}\n", certificate.content_hash));
    report.push_str(&format!(
        "Signature:        {} ({})\n",
        certificate.signature.value, certificate.signature.scheme
    ));
    if let Some(prior) = &certificate.prior_certificate_hash {
        report.push_str(&format!("Prior in chain:   {}\n", prior));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::{DeviceClassification, DecisionRecord};
    use crate::{MediaClass, WipeMethod};

    fn mock_device() -> Device {
        Device {
            path: "/dev/sdz".to_string(),
            total_sectors: 1_000_000,
            sector_size: 512,
            media_class: MediaClass::Ssd,
            is_system_disk: false,
            model: "MockDisk 500".to_string(),
            serial: "MD-500-1".to_string(),
        }
    }

    fn decision() -> DecisionRecord {
        DecisionRecord {
            timestamp: crate::now_utc(),
            device_path: "/dev/sdz".to_string(),
            classification: DeviceClassification::FixedOk,
            allowed: true,
            reason: "device classified wipeable".to_string(),
            override_attempted: false,
            override_granted: false,
            operator_id: None,
        }
    }

    fn success_pass(index: u32) -> PassResult {
        let now = crate::now_utc();
        PassResult {
            index,
            pattern: "random".to_string(),
            bytes_written: 512_000_000,
            started_at: now,
            ended_at: now,
            outcome: PassOutcome::Success,
            error: None,
        }
    }

    fn draft(state: WipeState, passes: Vec<PassResult>, prior: Option<String>) -> CertificateDraft {
        let device = mock_device();
        let request = WipeRequest::new(device.clone(), WipeMethod::Random, device.path.clone());
        CertificateDraft {
            request: RequestSummary::from_request(&request),
            device: DeviceIdentity::from_device(&device),
            safety_decision: decision(),
            hidden_before: None,
            hidden_after: None,
            pass_results: passes,
            verdict: None,
            state,
            warnings: Vec::new(),
            prior_certificate_hash: prior,
        }
    }

    #[test]
    fn build_signs_and_verifies() {
        let builder = CertificateBuilder::new(Signer::hmac_from_secret(b"unit-secret"));
        let mut d = draft(WipeState::Done, vec![success_pass(0)], None);
        d.request.verify = false;
        let cert = builder.build(d).unwrap();

        assert!(!cert.content_hash.is_empty());
        assert!(builder.verify(&cert).unwrap());
        assert!(cert.complete);
    }

    #[test]
    fn altering_any_field_invalidates_signature() {
        let builder = CertificateBuilder::new(Signer::hmac_from_secret(b"unit-secret"));
        let mut d = draft(WipeState::Done, vec![success_pass(0)], None);
        d.request.verify = false;
        let cert = builder.build(d).unwrap();

        let mut tampered = cert.clone();
        tampered.pass_results[0].bytes_written = 1;
        assert!(!builder.verify(&tampered).unwrap());

        let mut tampered = cert.clone();
        tampered.state = WipeState::Failed;
        assert!(!builder.verify(&tampered).unwrap());

        let mut tampered = cert;
        tampered.request.passes = 99;
        assert!(!builder.verify(&tampered).unwrap());
    }

    #[test]
    fn verification_outcome_gates_completeness() {
        let builder = CertificateBuilder::new(Signer::hmac_from_secret(b"unit-secret"));

        // verify requested but never run: not complete
        let cert = builder
            .build(draft(WipeState::Done, vec![success_pass(0)], None))
            .unwrap();
        assert!(!cert.complete);

        // aborted run: never complete
        let cert = builder
            .build(draft(WipeState::Aborted, vec![success_pass(0)], None))
            .unwrap();
        assert!(!cert.complete);
    }

    #[test]
    fn chain_links_and_breaks() {
        let builder = CertificateBuilder::new(Signer::hmac_from_secret(b"unit-secret"));
        let mut d1 = draft(WipeState::Done, vec![success_pass(0)], None);
        d1.request.verify = false;
        let first = builder.build(d1).unwrap();

        let mut d2 = draft(
            WipeState::Done,
            vec![success_pass(0)],
            Some(first.content_hash.clone()),
        );
        d2.request.verify = false;
        let second = builder.build(d2).unwrap();

        assert_eq!(
            second.prior_certificate_hash.as_deref(),
            Some(first.content_hash.as_str())
        );
        verify_chain(&[first.clone(), second.clone()]).unwrap();

        let mut broken = second;
        broken.prior_certificate_hash = Some("deadbeef".to_string());
        assert!(verify_chain(&[first, broken]).is_err());
    }

    #[test]
    fn canonicalization_sorts_keys_recursively() {
        let value: Value = serde_json::from_str(r#"{"b":{"z":1,"a":[{"y":2,"x":3}]},"a":null}"#)
            .unwrap();
        let mut out = String::new();
        canonicalize(&value, &mut out);
        assert_eq!(out, r#"{"a":null,"b":{"a":[{"x":3,"y":2}],"z":1}}"#);
    }

    #[test]
    fn save_load_round_trips_every_field() {
        let builder = CertificateBuilder::new(Signer::hmac_from_secret(b"unit-secret"));
        let mut d = draft(WipeState::Done, vec![success_pass(0), success_pass(1)], None);
        d.warnings.push("hidden-area state unknown".to_string());
        let cert = builder.build(d).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.json");
        save_certificate(&cert, path.to_str().unwrap()).unwrap();
        let loaded = load_certificate(path.to_str().unwrap()).unwrap();

        assert_eq!(loaded.certificate_id, cert.certificate_id);
        assert_eq!(loaded.content_hash, cert.content_hash);
        assert_eq!(loaded.signature.value, cert.signature.value);
        assert_eq!(loaded.pass_results.len(), 2);
        assert_eq!(loaded.warnings, cert.warnings);
        // The reloaded record still verifies, so nothing was lost in transit
        assert!(builder.verify(&loaded).unwrap());
    }

    #[test]
    fn ed25519_certificates_embed_public_key() {
        let (signer, _pkcs8) = Signer::generate_ed25519().unwrap();
        let builder = CertificateBuilder::new(signer);
        let mut d = draft(WipeState::Done, vec![success_pass(0)], None);
        d.request.verify = false;
        let cert = builder.build(d).unwrap();

        assert_eq!(cert.signature.scheme, SignatureScheme::Ed25519);
        assert!(cert.signature.public_key.is_some());
        assert!(builder.verify(&cert).unwrap());
    }

    #[test]
    fn text_report_is_derived_not_mutating() {
        let builder = CertificateBuilder::new(Signer::hmac_from_secret(b"unit-secret"));
        let cert = builder
            .build(draft(WipeState::Aborted, vec![success_pass(0)], None))
            .unwrap();
        let report = render_text_report(&cert);
        assert!(report.contains("INCOMPLETE"));
        assert!(report.contains(&cert.content_hash));
        // Rendering must not invalidate the signed record
        assert!(builder.verify(&cert).unwrap());
    }
}
