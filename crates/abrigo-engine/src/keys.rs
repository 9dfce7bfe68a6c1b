use abrigo_core::ids::UserId;
use abrigo_core::security::MasterSecret;
use abrigo_crypto::EncryptionSession;
use abrigo_store::{Database, UserRepo};
use tracing::instrument;

use crate::error::PipelineError;

/// Opens per-user encryption sessions.
///
/// Each call derives a fresh key on the blocking pool. Nothing is cached
/// between calls, so a key never outlives the operation that asked for it.
#[derive(Clone)]
pub struct KeyService {
    users: UserRepo,
    master: MasterSecret,
    iterations: Option<u32>,
}

impl KeyService {
    pub fn new(db: Database, master: MasterSecret) -> Self {
        Self {
            users: UserRepo::new(db),
            master,
            iterations: None,
        }
    }

    /// Lower the derivation cost. Only for tests.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = Some(iterations);
        self
    }

    /// Session for `user_id`, whose identity-provider subject is `subject`.
    /// Users created before salts existed get one here.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn session_for(&self, user_id: &UserId, subject: &str) -> Result<EncryptionSession, PipelineError> {
        let salt = self.users.ensure_salt(user_id)?;
        let mut session = EncryptionSession::new(subject, salt, self.master.clone());
        if let Some(iterations) = self.iterations {
            session = session.with_iterations(iterations);
        }
        Ok(session.prepared().await?)
    }
}
