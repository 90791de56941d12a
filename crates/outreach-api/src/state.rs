//! Application state.

use std::sync::Arc;

use outreach_store::{
    FirestoreClient, FirestoreHoldStore, FirestoreLedger, HoldStore, LedgerStore, MemoryHoldStore,
    MemoryLedger,
};
use tracing::{info, warn};

use crate::auth::{GoogleIdTokenVerifier, IdentityVerifier};
use crate::config::{ApiConfig, CreditConfig, OperationConfig, StoreBackend};
use crate::providers::{
    BrightDataClient, EmailFinder, GeminiClient, ScrapeProvider, SnovClient, TextGenerator,
};
use crate::services::{
    CreditService, EmailService, HoldManager, MessageService, PaidOperationRunner, ProfileService,
    SubmissionGuard,
};

/// External providers behind the paid operations.
#[derive(Clone)]
pub struct Providers {
    pub scraper: Arc<dyn ScrapeProvider>,
    pub generator: Arc<dyn TextGenerator>,
    pub email_finder: Arc<dyn EmailFinder>,
}

impl Providers {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            scraper: Arc::new(BrightDataClient::from_env()?),
            generator: Arc::new(GeminiClient::from_env()?),
            email_finder: Arc::new(SnovClient::from_env()?),
        })
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub credits: CreditService,
    pub profiles: ProfileService,
    pub messages: MessageService,
    pub emails: EmailService,
    pub operations: Arc<OperationConfig>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    /// Build state from environment variables, connecting the selected backends.
    pub async fn from_env(config: ApiConfig) -> anyhow::Result<Self> {
        let credit_config = CreditConfig::from_env()?;
        let operation_config = OperationConfig::from_env()?;

        let firestore = if credit_config.ledger_backend == StoreBackend::Firestore
            || credit_config.hold_backend == StoreBackend::Firestore
        {
            Some(FirestoreClient::from_env().await?)
        } else {
            None
        };

        let ledger: Arc<dyn LedgerStore> = match (&credit_config.ledger_backend, &firestore) {
            (StoreBackend::Firestore, Some(client)) => Arc::new(FirestoreLedger::new(client.clone())),
            _ => {
                warn!("Using in-memory ledger; balances are lost on restart");
                Arc::new(MemoryLedger::new())
            }
        };

        let holds: Arc<dyn HoldStore> = match (&credit_config.hold_backend, &firestore) {
            (StoreBackend::Firestore, Some(client)) => {
                Arc::new(FirestoreHoldStore::new(client.clone()))
            }
            _ => Arc::new(MemoryHoldStore::new()),
        };

        info!(
            ledger = credit_config.ledger_backend.as_str(),
            holds = credit_config.hold_backend.as_str(),
            "Credit stores selected"
        );

        let verifier: Arc<dyn IdentityVerifier> =
            Arc::new(GoogleIdTokenVerifier::new(config.google_client_ids.clone())?);

        Ok(Self::assemble(
            config,
            credit_config,
            operation_config,
            ledger,
            holds,
            Providers::from_env()?,
            verifier,
        ))
    }

    /// Wire services from already-built parts.
    pub fn assemble(
        config: ApiConfig,
        credit_config: CreditConfig,
        operation_config: OperationConfig,
        ledger: Arc<dyn LedgerStore>,
        holds: Arc<dyn HoldStore>,
        providers: Providers,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let hold_manager = HoldManager::new(holds, Arc::clone(&ledger), credit_config.hold_ttl);
        let credits = CreditService::new(ledger, hold_manager, Arc::new(credit_config));
        let operations = Arc::new(operation_config);
        let runner = PaidOperationRunner::new(
            credits.clone(),
            SubmissionGuard::new(),
            Arc::clone(&operations),
        );

        Self {
            config,
            profiles: ProfileService::new(runner.clone(), providers.scraper),
            messages: MessageService::new(runner.clone(), providers.generator),
            emails: EmailService::new(runner, providers.email_finder),
            credits,
            operations,
            verifier,
        }
    }
}
