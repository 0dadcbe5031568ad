//! Credential resolution.
//!
//! The orchestrator that turns a source id into plaintext credentials:
//! locate the owning account, obtain a passphrase (cache, else prompt),
//! derive the KEK (through the key cache, deduplicated per account), unwrap
//! the master key, decrypt the source config.
//!
//! Failure policy: an ambiguous decryption failure evicts the passphrase
//! cache entry and both key cache tiers for the account, then retries
//! exactly once. A second failure propagates unchanged, so a genuinely
//! wrong passphrase surfaces to the user after two attempts instead of
//! looping. Validation errors never retry.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use sl_crypto::{aead, kdf, SymmetricKey};

use crate::error::VaultError;
use crate::key_cache::{master_key_ttl, KeyCacheService};
use crate::models::{Account, Source, SourceCredentials, ValidatedKeyMaterial, MIN_PASSPHRASE_LEN};
use crate::passphrase_cache::PassphraseCacheService;
use crate::traits::{DecryptDelegate, PassphrasePrompter, PromptContext, SourceDirectory};

/// The vault's resolution engine. All collaborators are injected; the
/// resolver holds no global state and registers no callbacks.
pub struct CredentialResolver {
    directory: Arc<dyn SourceDirectory>,
    prompter: Arc<dyn PassphrasePrompter>,
    key_cache: Arc<KeyCacheService>,
    passphrase_cache: Arc<PassphraseCacheService>,
    delegate: Option<Arc<dyn DecryptDelegate>>,
    // Per-account guards so a burst of concurrent resolves pays the KDF
    // cost once instead of once per call.
    derive_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

struct LocatedSource {
    account: Account,
    source: Source,
    key_material: ValidatedKeyMaterial,
}

impl CredentialResolver {
    pub fn new(
        directory: Arc<dyn SourceDirectory>,
        prompter: Arc<dyn PassphrasePrompter>,
        key_cache: Arc<KeyCacheService>,
        passphrase_cache: Arc<PassphraseCacheService>,
    ) -> Self {
        Self {
            directory,
            prompter,
            key_cache,
            passphrase_cache,
            delegate: None,
            derive_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Route unwrap+decrypt through a backend service instead of the local
    /// KDF. For sandboxed runtimes where the memory-hard derivation is
    /// unreliable.
    pub fn with_delegate(mut self, delegate: Arc<dyn DecryptDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Resolve `source_id` to plaintext credentials.
    pub async fn resolve(&self, source_id: &str) -> Result<SourceCredentials, VaultError> {
        let located = self.locate(source_id).await?;
        match self.attempt(&located).await {
            Ok(credentials) => Ok(credentials),
            Err(err) if err.is_retryable() => {
                warn!(
                    account = %located.account.id,
                    source = %located.source.id,
                    "decryption failed, evicting cached material and retrying once"
                );
                self.passphrase_cache.remove(&located.account.id).await;
                self.key_cache.remove(&located.account.id).await;
                self.attempt(&located).await
            }
            Err(err) => Err(err),
        }
    }

    /// Find the account owning `source_id` and validate its key material.
    async fn locate(&self, source_id: &str) -> Result<LocatedSource, VaultError> {
        let accounts = self.directory.list_accounts().await?;
        let mut scanned = Vec::with_capacity(accounts.len());

        for account in accounts {
            let listing = self.directory.account_sources(&account.id).await?;
            if let Some(source) = listing.sources.iter().find(|s| s.id == source_id) {
                let key_material = listing.key_data.validate()?;
                return Ok(LocatedSource {
                    source: source.clone(),
                    account,
                    key_material,
                });
            }
            scanned.push((account, listing));
        }

        // No exact match: a single-account, single-source setup
        // unambiguously owns every request.
        if let [(account, listing)] = &scanned[..] {
            if let [source] = &listing.sources[..] {
                debug!(
                    account = %account.id,
                    source = %source.id,
                    requested = source_id,
                    "no exact match, falling back to the sole configured source"
                );
                let key_material = listing.key_data.validate()?;
                return Ok(LocatedSource {
                    account: account.clone(),
                    source: source.clone(),
                    key_material,
                });
            }
        }

        Err(VaultError::SourceNotFound(source_id.to_string()))
    }

    /// One full attempt: passphrase, master key, config decrypt.
    async fn attempt(&self, located: &LocatedSource) -> Result<SourceCredentials, VaultError> {
        let passphrase = self.obtain_passphrase(located).await?;

        // Sandboxed-runtime carve-out: the backend performs the whole
        // unwrap+decrypt and returns plaintext credentials. The retry
        // policy in `resolve` applies unchanged.
        if let Some(delegate) = &self.delegate {
            debug!(
                account = %located.account.id,
                source = %located.source.id,
                "delegating source decryption to backend"
            );
            return delegate
                .decrypt_source(&located.source.id, &passphrase)
                .await;
        }

        let master_key = self.obtain_master_key(located, &passphrase).await?;

        let config = located.source.validated_config()?;
        let plaintext = aead::decrypt(config.algo, &master_key, &config.nonce, &config.ciphertext)?;
        // Authentication succeeded, so garbage here means the stored
        // plaintext itself is corrupt, not that the passphrase was wrong.
        serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::InvalidSourceConfig(format!("credential payload: {e}")))
    }

    async fn obtain_passphrase(
        &self,
        located: &LocatedSource,
    ) -> Result<Zeroizing<String>, VaultError> {
        let account_id = &located.account.id;
        if let Some(cached) = self.passphrase_cache.get(account_id).await {
            debug!(account = %account_id, "passphrase cache hit");
            return Ok(cached);
        }

        let ctx = PromptContext {
            title: "Unlock source".into(),
            message: format!(
                "Enter the passphrase for \"{}\" to open this source.",
                located.account.name
            ),
            account_name: located.account.name.clone(),
        };
        let passphrase = self.prompter.prompt(account_id, &ctx).await?;
        if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
            return Err(VaultError::WeakPassphrase {
                min: MIN_PASSPHRASE_LEN,
            });
        }

        self.passphrase_cache
            .set(account_id, passphrase.clone())
            .await;
        Ok(passphrase)
    }

    /// The account master key: from the cache when live, otherwise derived
    /// from the passphrase and unwrapped.
    async fn obtain_master_key(
        &self,
        located: &LocatedSource,
        passphrase: &Zeroizing<String>,
    ) -> Result<SymmetricKey, VaultError> {
        let account_id = &located.account.id;
        let guard = self.derive_lock(account_id).await;
        let _held = guard.lock().await;

        if let Some(key) = self.key_cache.get(account_id).await {
            debug!(account = %account_id, "master key cache hit");
            return Ok(key);
        }

        // The KDF is deliberately ~1s of CPU; keep it off the cooperative
        // runtime.
        let key_material = located.key_material.clone();
        let pass = passphrase.clone();
        let kek = tokio::task::spawn_blocking(move || {
            kdf::derive_key(
                pass.as_str(),
                &key_material.salt,
                key_material.kdf,
                &key_material.kdf_params,
            )
        })
        .await
        .map_err(|e| VaultError::KdfUnavailable(e.to_string()))??;

        let unwrapped = aead::decrypt(
            located.key_material.wrap_algo,
            &kek,
            &located.key_material.nonce,
            &located.key_material.wrapped_master_key,
        )?;
        let master_key = SymmetricKey::from_slice(&unwrapped)?;

        self.key_cache
            .put(account_id, master_key.clone(), master_key_ttl())
            .await;
        Ok(master_key)
    }

    async fn derive_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.derive_locks.lock().await;
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountSources, KeyMaterial};
    use crate::provision::seal_source_config;
    use async_trait::async_trait;
    use sl_crypto::{encoding, KdfAlgo, KdfParams, WrapAlgo};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Cheap PBKDF2 fixture so tests do not pay Argon2id cost.
    fn fixture_key_material(passphrase: &str) -> (KeyMaterial, SymmetricKey) {
        let salt = [0u8; 16];
        let params = KdfParams {
            iterations: Some(1000),
            ..KdfParams::default()
        };
        let kek = kdf::derive_key(passphrase, &salt, KdfAlgo::Pbkdf2, &params).unwrap();
        let master_key = SymmetricKey::generate();
        let nonce = aead::generate_nonce(WrapAlgo::XChaCha20Poly1305);
        let wrapped = aead::encrypt(
            WrapAlgo::XChaCha20Poly1305,
            &kek,
            &nonce,
            master_key.as_bytes(),
        )
        .unwrap();
        let material = KeyMaterial {
            salt: encoding::b64_encode(&salt),
            iv: encoding::b64_encode(&nonce),
            wrapped_master_key: encoding::b64_encode(&wrapped),
            kdf: Some(KdfAlgo::Pbkdf2),
            kdf_params: Some(params),
            wrap_algo: Some(WrapAlgo::XChaCha20Poly1305),
        };
        (material, master_key)
    }

    fn fixture_credentials() -> SourceCredentials {
        SourceCredentials {
            server: "http://stream.example:8080".into(),
            username: "user1".into(),
            password: "pw-secret".into(),
            container_extension: Some("ts".into()),
            video_codec: None,
            audio_codec: None,
        }
    }

    fn fixture_source(id: &str, master_key: &SymmetricKey) -> Source {
        let (encrypted_config, config_iv) =
            seal_source_config(master_key, &fixture_credentials()).unwrap();
        Source {
            id: id.into(),
            name: format!("Source {id}"),
            encrypted_config,
            config_iv,
            config_algo: Some(WrapAlgo::XChaCha20Poly1305),
        }
    }

    struct StaticDirectory {
        accounts: Vec<Account>,
        listings: HashMap<String, AccountSources>,
    }

    impl StaticDirectory {
        fn single(account_id: &str, sources: Vec<Source>, key_data: KeyMaterial) -> Self {
            let account = Account {
                id: account_id.into(),
                name: format!("Account {account_id}"),
            };
            let mut listings = HashMap::new();
            listings.insert(account_id.to_string(), AccountSources { sources, key_data });
            Self {
                accounts: vec![account],
                listings,
            }
        }
    }

    #[async_trait]
    impl SourceDirectory for StaticDirectory {
        async fn list_accounts(&self) -> Result<Vec<Account>, VaultError> {
            Ok(self.accounts.clone())
        }

        async fn account_sources(&self, account_id: &str) -> Result<AccountSources, VaultError> {
            self.listings
                .get(account_id)
                .cloned()
                .ok_or_else(|| VaultError::Directory(format!("unknown account {account_id}")))
        }
    }

    /// Plays back a scripted sequence of prompt outcomes and counts calls.
    struct ScriptedPrompter {
        answers: Mutex<VecDeque<Result<String, VaultError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedPrompter {
        fn new(answers: Vec<Result<String, VaultError>>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PassphrasePrompter for ScriptedPrompter {
        async fn prompt(
            &self,
            _account_id: &str,
            _ctx: &PromptContext,
        ) -> Result<Zeroizing<String>, VaultError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answers.lock().await.pop_front() {
                Some(Ok(answer)) => Ok(Zeroizing::new(answer)),
                Some(Err(err)) => Err(err),
                None => Err(VaultError::PassphraseRequired),
            }
        }
    }

    fn resolver_with(
        directory: StaticDirectory,
        prompter: Arc<ScriptedPrompter>,
    ) -> CredentialResolver {
        CredentialResolver::new(
            Arc::new(directory),
            prompter,
            Arc::new(KeyCacheService::in_memory()),
            Arc::new(PassphraseCacheService::new()),
        )
    }

    #[tokio::test]
    async fn happy_path_resolves_credentials() {
        let (material, master_key) = fixture_key_material("correct-horse");
        let directory =
            StaticDirectory::single("acc-1", vec![fixture_source("src-1", &master_key)], material);
        let prompter = Arc::new(ScriptedPrompter::new(vec![Ok("correct-horse".into())]));
        let resolver = resolver_with(directory, prompter.clone());

        let credentials = resolver.resolve("src-1").await.unwrap();
        assert_eq!(credentials, fixture_credentials());
        assert_eq!(prompter.call_count(), 1);
    }

    #[tokio::test]
    async fn cached_passphrase_skips_second_prompt() {
        let (material, master_key) = fixture_key_material("correct-horse");
        let directory =
            StaticDirectory::single("acc-1", vec![fixture_source("src-1", &master_key)], material);
        let prompter = Arc::new(ScriptedPrompter::new(vec![Ok("correct-horse".into())]));
        let resolver = resolver_with(directory, prompter.clone());

        resolver.resolve("src-1").await.unwrap();
        resolver.resolve("src-1").await.unwrap();
        assert_eq!(prompter.call_count(), 1);
    }

    #[tokio::test]
    async fn wrong_then_correct_passphrase_recovers() {
        let (material, master_key) = fixture_key_material("correct-horse");
        let directory =
            StaticDirectory::single("acc-1", vec![fixture_source("src-1", &master_key)], material);
        let prompter = Arc::new(ScriptedPrompter::new(vec![
            Ok("wrong-password".into()),
            Ok("correct-horse".into()),
        ]));
        let resolver = resolver_with(directory, prompter.clone());

        let credentials = resolver.resolve("src-1").await.unwrap();
        assert_eq!(credentials, fixture_credentials());
        assert_eq!(prompter.call_count(), 2);
    }

    #[tokio::test]
    async fn retry_is_bounded_to_two_attempts() {
        let (material, master_key) = fixture_key_material("correct-horse");
        let directory =
            StaticDirectory::single("acc-1", vec![fixture_source("src-1", &master_key)], material);
        // A third, correct answer is scripted but must never be consumed.
        let prompter = Arc::new(ScriptedPrompter::new(vec![
            Ok("wrong-password".into()),
            Ok("still-wrong".into()),
            Ok("correct-horse".into()),
        ]));
        let resolver = resolver_with(directory, prompter.clone());

        let err = resolver.resolve("src-1").await.unwrap_err();
        assert!(matches!(err, VaultError::DecryptionFailed));
        assert_eq!(prompter.call_count(), 2);
    }

    #[tokio::test]
    async fn unknown_source_fails_before_any_prompt() {
        let (material, master_key) = fixture_key_material("correct-horse");
        let directory = StaticDirectory::single(
            "acc-1",
            vec![
                fixture_source("src-1", &master_key),
                fixture_source("src-2", &master_key),
            ],
            material,
        );
        let prompter = Arc::new(ScriptedPrompter::new(vec![]));
        let resolver = resolver_with(directory, prompter.clone());

        let err = resolver.resolve("src-unknown").await.unwrap_err();
        assert!(matches!(err, VaultError::SourceNotFound(_)));
        assert_eq!(prompter.call_count(), 0);
    }

    #[tokio::test]
    async fn sole_source_fallback_when_no_exact_match() {
        let (material, master_key) = fixture_key_material("correct-horse");
        let directory =
            StaticDirectory::single("acc-1", vec![fixture_source("src-1", &master_key)], material);
        let prompter = Arc::new(ScriptedPrompter::new(vec![Ok("correct-horse".into())]));
        let resolver = resolver_with(directory, prompter.clone());

        // Requested id does not exist, but the directory has exactly one
        // account with exactly one source.
        let credentials = resolver.resolve("src-renamed").await.unwrap();
        assert_eq!(credentials, fixture_credentials());
    }

    #[tokio::test]
    async fn cancelled_prompt_is_fatal() {
        let (material, master_key) = fixture_key_material("correct-horse");
        let directory =
            StaticDirectory::single("acc-1", vec![fixture_source("src-1", &master_key)], material);
        let prompter = Arc::new(ScriptedPrompter::new(vec![Err(VaultError::UserCancelled)]));
        let resolver = resolver_with(directory, prompter.clone());

        let err = resolver.resolve("src-1").await.unwrap_err();
        assert!(matches!(err, VaultError::UserCancelled));
        assert_eq!(prompter.call_count(), 1);
    }

    #[tokio::test]
    async fn short_passphrase_from_prompt_is_rejected() {
        let (material, master_key) = fixture_key_material("correct-horse");
        let directory =
            StaticDirectory::single("acc-1", vec![fixture_source("src-1", &master_key)], material);
        let prompter = Arc::new(ScriptedPrompter::new(vec![Ok("abc".into())]));
        let resolver = resolver_with(directory, prompter.clone());

        let err = resolver.resolve("src-1").await.unwrap_err();
        assert!(matches!(err, VaultError::WeakPassphrase { min: 6 }));
    }

    #[tokio::test]
    async fn poisoned_key_cache_recovers_via_retry() {
        let (material, master_key) = fixture_key_material("correct-horse");
        let directory =
            StaticDirectory::single("acc-1", vec![fixture_source("src-1", &master_key)], material);
        let prompter = Arc::new(ScriptedPrompter::new(vec![
            Ok("correct-horse".into()),
            Ok("correct-horse".into()),
        ]));
        let key_cache = Arc::new(KeyCacheService::in_memory());
        // Poison the cache with a key that authenticates nothing.
        key_cache
            .put("acc-1", SymmetricKey::generate(), master_key_ttl())
            .await;
        let resolver = CredentialResolver::new(
            Arc::new(directory),
            prompter.clone(),
            key_cache,
            Arc::new(PassphraseCacheService::new()),
        );

        let credentials = resolver.resolve("src-1").await.unwrap();
        assert_eq!(credentials, fixture_credentials());
        // First attempt used the poisoned key and failed; the retry evicted
        // it and re-derived.
        assert_eq!(prompter.call_count(), 2);
    }

    struct StaticDelegate {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl DecryptDelegate for StaticDelegate {
        async fn decrypt_source(
            &self,
            source_id: &str,
            passphrase: &str,
        ) -> Result<SourceCredentials, VaultError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(source_id, "src-1");
            if self.fail_first && call == 0 {
                return Err(VaultError::DecryptionFailed);
            }
            if passphrase == "correct-horse" {
                Ok(fixture_credentials())
            } else {
                Err(VaultError::DecryptionFailed)
            }
        }
    }

    #[tokio::test]
    async fn delegate_carve_out_bypasses_local_unwrap() {
        let (material, _master_key) = fixture_key_material("correct-horse");
        // The stored config is garbage; only the delegate can succeed.
        let source = Source {
            id: "src-1".into(),
            name: "Backend only".into(),
            encrypted_config: encoding::b64_encode(&[0u8; 8]),
            config_iv: encoding::b64_encode(&[0u8; 24]),
            config_algo: Some(WrapAlgo::XChaCha20Poly1305),
        };
        let directory = StaticDirectory::single("acc-1", vec![source], material);
        let prompter = Arc::new(ScriptedPrompter::new(vec![Ok("correct-horse".into())]));
        let delegate = Arc::new(StaticDelegate {
            calls: AtomicUsize::new(0),
            fail_first: false,
        });
        let resolver = resolver_with(directory, prompter.clone()).with_delegate(delegate.clone());

        let credentials = resolver.resolve("src-1").await.unwrap();
        assert_eq!(credentials, fixture_credentials());
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delegate_failures_follow_the_retry_policy() {
        let (material, master_key) = fixture_key_material("correct-horse");
        let directory =
            StaticDirectory::single("acc-1", vec![fixture_source("src-1", &master_key)], material);
        let prompter = Arc::new(ScriptedPrompter::new(vec![
            Ok("correct-horse".into()),
            Ok("correct-horse".into()),
        ]));
        let delegate = Arc::new(StaticDelegate {
            calls: AtomicUsize::new(0),
            fail_first: true,
        });
        let resolver = resolver_with(directory, prompter.clone()).with_delegate(delegate.clone());

        let credentials = resolver.resolve("src-1").await.unwrap();
        assert_eq!(credentials, fixture_credentials());
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 2);
        assert_eq!(prompter.call_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_derivation() {
        let (material, master_key) = fixture_key_material("correct-horse");
        let directory =
            StaticDirectory::single("acc-1", vec![fixture_source("src-1", &master_key)], material);
        let prompter = Arc::new(ScriptedPrompter::new(vec![
            Ok("correct-horse".into()),
            Ok("correct-horse".into()),
        ]));
        let resolver = Arc::new(resolver_with(directory, prompter.clone()));

        let a = tokio::spawn({
            let resolver = resolver.clone();
            async move { resolver.resolve("src-1").await }
        });
        let b = tokio::spawn({
            let resolver = resolver.clone();
            async move { resolver.resolve("src-1").await }
        });

        assert_eq!(a.await.unwrap().unwrap(), fixture_credentials());
        assert_eq!(b.await.unwrap().unwrap(), fixture_credentials());
    }
}
