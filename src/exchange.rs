//! Request/response handshake between two devices.
//!
//! Requester: `Idle -> Displaying(request) -> AwaitingScan -> Completed`.
//! Responder: `Idle -> Decoding -> Resolving -> AwaitingApproval ->
//! Displaying(response) | Rejected`.
//!
//! Persistence and approval UI are collaborators behind [`Keychain`] and
//! [`ApprovalUi`]. Nothing is released without an explicit approval.

use std::mem;

use tracing::{info, warn};
use uuid::Uuid;

use crate::asset::{KeyType, UseInfo};
use crate::codec::WireRecord;
use crate::config::Config;
use crate::display::FrameDisplay;
use crate::error::{ExchangeError, Result};
use crate::fountain::ReassemblyState;
use crate::key::{HdKey, Seed};
use crate::path::DerivationPath;
use crate::preset::DerivationPreset;
use crate::scan::ScanSession;
use crate::transaction::{RequestBody, ResponseBody, TransactionRequest, TransactionResponse};

/// Local store of seeds and the keys derivable from them.
pub trait Keychain {
    fn find_seed(&self, fingerprint: u32) -> Option<Seed>;

    /// Key at `path` from a local seed suited to `use_info`, if there is one.
    fn derive_key(&self, key_type: KeyType, path: &DerivationPath, use_info: &UseInfo) -> Option<HdKey>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Artifact {
    Seed(Seed),
    Key(HdKey),
}

impl From<Artifact> for ResponseBody {
    fn from(artifact: Artifact) -> Self {
        match artifact {
            Artifact::Seed(seed) => ResponseBody::Seed(seed),
            Artifact::Key(key) => ResponseBody::Key(key),
        }
    }
}

/// What the user is asked to release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Disclosure {
    pub artifact: Artifact,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Approval {
    Accepted(Artifact),
    Rejected,
}

pub trait ApprovalUi {
    fn request_approval(&mut self, disclosure: &Disclosure) -> Approval;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    NoMatchingSeed,
    NoMatchingKey,
    Declined,
}

#[derive(Debug)]
pub enum ResponderState {
    Idle,
    Decoding,
    Resolving(TransactionRequest),
    AwaitingApproval {
        request: TransactionRequest,
        disclosure: Disclosure,
    },
    Displaying {
        response: TransactionResponse,
        display: FrameDisplay,
    },
    Rejected {
        request_id: Uuid,
        reason: RejectReason,
    },
}

impl ResponderState {
    fn name(&self) -> &'static str {
        match self {
            ResponderState::Idle => "idle",
            ResponderState::Decoding => "decoding",
            ResponderState::Resolving(_) => "resolving",
            ResponderState::AwaitingApproval { .. } => "awaiting approval",
            ResponderState::Displaying { .. } => "displaying",
            ResponderState::Rejected { .. } => "rejected",
        }
    }
}

fn describe(request: &TransactionRequest, artifact: &Artifact) -> String {
    let mut text = match (&request.body, artifact) {
        (_, Artifact::Seed(seed)) => format!(
            "Another device is requesting the seed \"{}\" on this device. Sending it allows \
             the other device to derive keys from it; its name and notes are sent too.",
            seed.name
        ),
        (RequestBody::KeyLookup { path, use_info, .. }, Artifact::Key(key)) => {
            let derivation = match DerivationPreset::origin_preset(path, use_info) {
                _ if path.is_master() => "the master path".to_string(),
                Some(preset) => format!("{} ({})", preset.name(), path),
                None => path.to_string(),
            };
            format!(
                "Another device is requesting a {} key for {} derived at {}.",
                key.key_type, use_info, derivation
            )
        }
        (_, Artifact::Key(key)) => format!("Another device is requesting a {} key.", key.key_type),
    };
    if let Some(note) = &request.description {
        text.push_str(&format!(" Request note: {}", note));
    }
    text
}

/// The device that answers a request.
#[derive(Debug)]
pub struct Responder {
    config: Config,
    session: ScanSession,
    state: ResponderState,
}

impl Responder {
    pub fn new(config: Config) -> Self {
        Self {
            session: ScanSession::new(&config),
            config,
            state: ResponderState::Idle,
        }
    }

    pub fn state(&self) -> &ResponderState {
        &self.state
    }

    /// Feed one scanned frame of an incoming request.
    ///
    /// A completed payload that is not a valid request is discarded and
    /// scanning continues; the error is returned for the UI to show.
    pub fn ingest_frame<K: Keychain>(&mut self, data: &[u8], keychain: &K) -> Result<&ResponderState> {
        match &self.state {
            ResponderState::Idle | ResponderState::Decoding => {}
            other => return Err(ExchangeError::InvalidState(other.name()).into()),
        }
        self.state = ResponderState::Decoding;

        let payload = match self.session.ingest_frame(data)? {
            ReassemblyState::Incomplete => return Ok(&self.state),
            ReassemblyState::Complete(payload) => payload,
        };

        match TransactionRequest::decode(&payload) {
            Ok(request) => Ok(self.handle_request(request, keychain)),
            Err(err) => {
                warn!(%err, "scanned data is not a transaction request");
                self.session.reset();
                Err(err.into())
            }
        }
    }

    /// Resolve a decoded request against the local keychain.
    pub fn handle_request<K: Keychain>(&mut self, request: TransactionRequest, keychain: &K) -> &ResponderState {
        info!(id = %request.id, "resolving request");
        self.state = ResponderState::Resolving(request.clone());

        let resolved = match &request.body {
            RequestBody::SeedLookup { fingerprint } => keychain
                .find_seed(fingerprint.get())
                .map(Artifact::Seed)
                .ok_or(RejectReason::NoMatchingSeed),
            RequestBody::KeyLookup {
                key_type,
                path,
                use_info,
            } => keychain
                .derive_key(*key_type, path, use_info)
                .map(Artifact::Key)
                .ok_or(RejectReason::NoMatchingKey),
        };

        self.state = match resolved {
            Ok(artifact) => {
                let description = describe(&request, &artifact);
                ResponderState::AwaitingApproval {
                    request,
                    disclosure: Disclosure {
                        artifact,
                        description,
                    },
                }
            }
            Err(reason) => {
                info!(id = %request.id, ?reason, "request rejected");
                ResponderState::Rejected {
                    request_id: request.id,
                    reason,
                }
            }
        };
        &self.state
    }

    /// Pending disclosure, while awaiting approval.
    pub fn disclosure(&self) -> Option<&Disclosure> {
        match &self.state {
            ResponderState::AwaitingApproval { disclosure, .. } => Some(disclosure),
            _ => None,
        }
    }

    /// Ask the approval collaborator; on accept, start displaying the response.
    pub fn decide<A: ApprovalUi>(&mut self, ui: &mut A) -> Result<&ResponderState> {
        let (request, disclosure) = match mem::replace(&mut self.state, ResponderState::Idle) {
            ResponderState::AwaitingApproval { request, disclosure } => (request, disclosure),
            other => {
                let name = other.name();
                self.state = other;
                return Err(ExchangeError::InvalidState(name).into());
            }
        };

        self.state = match ui.request_approval(&disclosure) {
            Approval::Accepted(artifact) => {
                let response = TransactionResponse::answering(&request, artifact.into());
                let display = match FrameDisplay::for_record(&response, &self.config) {
                    Ok(display) => display,
                    Err(err) => {
                        self.state = ResponderState::AwaitingApproval { request, disclosure };
                        return Err(err);
                    }
                };
                let frames = display.frame_count();
                info!(id = %response.id, frames, "displaying response");
                ResponderState::Displaying { response, display }
            }
            Approval::Rejected => {
                info!(id = %request.id, "approval declined");
                ResponderState::Rejected {
                    request_id: request.id,
                    reason: RejectReason::Declined,
                }
            }
        };
        Ok(&self.state)
    }

    pub fn response(&self) -> Option<&TransactionResponse> {
        match &self.state {
            ResponderState::Displaying { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn display_mut(&mut self) -> Option<&mut FrameDisplay> {
        match &mut self.state {
            ResponderState::Displaying { display, .. } => Some(display),
            _ => None,
        }
    }

    /// Abandon the current exchange.
    pub fn reset(&mut self) {
        self.session.reset();
        self.state = ResponderState::Idle;
    }
}

#[derive(Debug)]
pub enum RequesterState {
    Idle,
    Displaying {
        request: TransactionRequest,
        display: FrameDisplay,
    },
    AwaitingScan {
        request: TransactionRequest,
    },
    Completed {
        request: TransactionRequest,
        response: TransactionResponse,
    },
}

impl RequesterState {
    fn name(&self) -> &'static str {
        match self {
            RequesterState::Idle => "idle",
            RequesterState::Displaying { .. } => "displaying",
            RequesterState::AwaitingScan { .. } => "awaiting scan",
            RequesterState::Completed { .. } => "completed",
        }
    }
}

/// The device that asks for a seed or key.
#[derive(Debug)]
pub struct Requester {
    config: Config,
    session: ScanSession,
    state: RequesterState,
}

impl Requester {
    pub fn new(config: Config) -> Self {
        Self {
            session: ScanSession::new(&config),
            config,
            state: RequesterState::Idle,
        }
    }

    pub fn state(&self) -> &RequesterState {
        &self.state
    }

    /// Show `request`, replacing any exchange in progress.
    pub fn start(&mut self, request: TransactionRequest) -> Result<&RequesterState> {
        let display = FrameDisplay::for_record(&request, &self.config)?;
        let frames = display.frame_count();
        info!(id = %request.id, frames, "displaying request");
        self.session.reset();
        self.state = RequesterState::Displaying { request, display };
        Ok(&self.state)
    }

    pub fn display_mut(&mut self) -> Option<&mut FrameDisplay> {
        match &mut self.state {
            RequesterState::Displaying { display, .. } => Some(display),
            _ => None,
        }
    }

    /// Stop displaying and start scanning for the response.
    pub fn begin_scan(&mut self) -> Result<()> {
        self.state = match mem::replace(&mut self.state, RequesterState::Idle) {
            RequesterState::Displaying { request, .. } => RequesterState::AwaitingScan { request },
            state @ RequesterState::AwaitingScan { .. } => state,
            other => {
                let name = other.name();
                self.state = other;
                return Err(ExchangeError::InvalidState(name).into());
            }
        };
        self.session.reset();
        Ok(())
    }

    /// Feed one scanned frame of the response. Frames scanned while still
    /// displaying switch to scanning.
    pub fn ingest_frame(&mut self, data: &[u8]) -> Result<&RequesterState> {
        if let RequesterState::Displaying { .. } = self.state {
            self.begin_scan()?;
        }
        let expected = match &self.state {
            RequesterState::AwaitingScan { request } => request.id,
            other => return Err(ExchangeError::InvalidState(other.name()).into()),
        };

        let payload = match self.session.ingest_frame(data)? {
            ReassemblyState::Incomplete => return Ok(&self.state),
            ReassemblyState::Complete(payload) => payload,
        };

        let response = match TransactionResponse::decode(&payload) {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "scanned data is not a transaction response");
                self.session.reset();
                return Err(err.into());
            }
        };
        if response.id != expected {
            warn!(expected = %expected, found = %response.id, "response for another request");
            self.session.reset();
            return Err(ExchangeError::IdMismatch {
                expected,
                found: response.id,
            }
            .into());
        }

        info!(id = %response.id, "response received");
        if let RequesterState::AwaitingScan { request } = mem::replace(&mut self.state, RequesterState::Idle) {
            self.state = RequesterState::Completed { request, response };
        }
        Ok(&self.state)
    }

    pub fn response(&self) -> Option<&TransactionResponse> {
        match &self.state {
            RequesterState::Completed { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.session.reset();
        self.state = RequesterState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Asset, Network};
    use crate::error::{DecodeError, Error};
    use std::collections::HashMap;

    struct MemoryKeychain {
        seeds: HashMap<u32, Seed>,
    }

    impl MemoryKeychain {
        fn with_seed(fingerprint: u32, seed: Seed) -> Self {
            Self {
                seeds: HashMap::from([(fingerprint, seed)]),
            }
        }
    }

    impl Keychain for MemoryKeychain {
        fn find_seed(&self, fingerprint: u32) -> Option<Seed> {
            self.seeds.get(&fingerprint).cloned()
        }

        fn derive_key(&self, key_type: KeyType, path: &DerivationPath, use_info: &UseInfo) -> Option<HdKey> {
            let (&fingerprint, _) = self.seeds.iter().next()?;
            let mut key = HdKey::new(key_type, vec![0x02; 33], *use_info).ok()?;
            key.origin = path.clone().with_origin(Some(fingerprint), None).ok();
            Some(key)
        }
    }

    struct ScriptedUi {
        accept: bool,
        seen: Vec<String>,
    }

    impl ApprovalUi for ScriptedUi {
        fn request_approval(&mut self, disclosure: &Disclosure) -> Approval {
            self.seen.push(disclosure.description.clone());
            if self.accept {
                Approval::Accepted(disclosure.artifact.clone())
            } else {
                Approval::Rejected
            }
        }
    }

    fn ui(accept: bool) -> ScriptedUi {
        ScriptedUi {
            accept,
            seen: Vec::new(),
        }
    }

    fn seed() -> Seed {
        Seed::new(vec![0x42; 16]).unwrap().with_name("Dark Purple")
    }

    #[test]
    fn test_approved_seed_lookup_answers_with_same_id() {
        let keychain = MemoryKeychain::with_seed(0xabad_cafe, seed());
        let request = TransactionRequest::new(RequestBody::seed_lookup(0xabad_cafe).unwrap());

        let mut responder = Responder::new(Config::default());
        responder.handle_request(request.clone(), &keychain);
        assert!(matches!(responder.state(), ResponderState::AwaitingApproval { .. }));
        assert!(responder.disclosure().unwrap().description.contains("Dark Purple"));

        let mut approver = ui(true);
        responder.decide(&mut approver).unwrap();
        assert_eq!(approver.seen.len(), 1);
        assert_eq!(
            responder.response(),
            Some(&TransactionResponse {
                id: request.id,
                body: ResponseBody::Seed(seed()),
            })
        );
        assert!(responder.display_mut().is_some());
    }

    #[test]
    fn test_declined_approval_emits_nothing() {
        let keychain = MemoryKeychain::with_seed(5, seed());
        let request = TransactionRequest::new(RequestBody::seed_lookup(5).unwrap());
        let mut responder = Responder::new(Config::default());
        responder.handle_request(request.clone(), &keychain);
        responder.decide(&mut ui(false)).unwrap();

        assert!(responder.response().is_none());
        assert!(matches!(
            responder.state(),
            ResponderState::Rejected {
                request_id,
                reason: RejectReason::Declined
            } if *request_id == request.id
        ));
    }

    #[test]
    fn test_missing_seed_is_rejected_without_approval() {
        let keychain = MemoryKeychain::with_seed(5, seed());
        let request = TransactionRequest::new(RequestBody::seed_lookup(6).unwrap());
        let mut responder = Responder::new(Config::default());
        responder.handle_request(request, &keychain);
        assert!(matches!(
            responder.state(),
            ResponderState::Rejected {
                reason: RejectReason::NoMatchingSeed,
                ..
            }
        ));

        let mut approver = ui(true);
        assert_eq!(
            responder.decide(&mut approver).unwrap_err(),
            Error::Exchange(ExchangeError::InvalidState("rejected"))
        );
        assert!(approver.seen.is_empty());
    }

    #[test]
    fn test_key_lookup_describes_preset() {
        let keychain = MemoryKeychain::with_seed(9, seed());
        let use_info = UseInfo::new(Asset::Btc, Network::Testnet);
        let request = TransactionRequest::new(RequestBody::KeyLookup {
            key_type: KeyType::Public,
            path: DerivationPreset::Segwit.generate(&use_info),
            use_info,
        });
        let mut responder = Responder::new(Config::default());
        responder.handle_request(request, &keychain);
        let description = &responder.disclosure().unwrap().description;
        assert!(description.contains("Segwit (84'/1'/0')"));
        assert!(description.contains("public"));

        responder.decide(&mut ui(true)).unwrap();
        assert!(matches!(
            responder.response().map(|r| &r.body),
            Some(ResponseBody::Key(_))
        ));
    }

    #[test]
    fn test_responder_discards_undecodable_payload() {
        let keychain = MemoryKeychain::with_seed(5, seed());
        let mut responder = Responder::new(Config::default());
        let not_a_request = FrameDisplay::for_record(&DerivationPath::master(), &Config::default()).unwrap();

        let err = responder
            .ingest_frame(not_a_request.current_frame(), &keychain)
            .unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::MalformedEnvelope(_))));
        assert!(matches!(responder.state(), ResponderState::Decoding));

        let request = TransactionRequest::new(RequestBody::seed_lookup(5).unwrap());
        let display = FrameDisplay::for_record(&request, &Config::default()).unwrap();
        responder.ingest_frame(display.current_frame(), &keychain).unwrap();
        assert!(matches!(responder.state(), ResponderState::AwaitingApproval { .. }));
    }

    #[test]
    fn test_requester_rejects_foreign_response() {
        let mut requester = Requester::new(Config::default());
        let request = TransactionRequest::new(RequestBody::seed_lookup(5).unwrap());
        requester.start(request.clone()).unwrap();

        let other = TransactionRequest::new(RequestBody::seed_lookup(5).unwrap());
        let foreign = TransactionResponse::answering(&other, ResponseBody::Seed(seed()));
        let display = FrameDisplay::for_record(&foreign, &Config::default()).unwrap();
        assert!(matches!(
            requester.ingest_frame(display.current_frame()),
            Err(Error::Exchange(ExchangeError::IdMismatch { .. }))
        ));
        assert!(matches!(requester.state(), RequesterState::AwaitingScan { .. }));

        let answer = TransactionResponse::answering(&request, ResponseBody::Seed(seed()));
        let display = FrameDisplay::for_record(&answer, &Config::default()).unwrap();
        requester.ingest_frame(display.current_frame()).unwrap();
        assert_eq!(requester.response(), Some(&answer));
    }

    #[test]
    fn test_requester_requires_start() {
        let mut requester = Requester::new(Config::default());
        assert_eq!(
            requester.begin_scan(),
            Err(Error::Exchange(ExchangeError::InvalidState("idle")))
        );
    }
}
