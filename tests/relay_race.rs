//! Relay race across independently tipped channels
//!
//! Each channel signs its own copy of the shared template with its own tip,
//! so the copies carry different signatures. Only one channel accepts.

use async_trait::async_trait;
use curve_sniper::rpc_manager::{random_tip, sign_for_channel, RelayChannel, RelayError, RelayRacer};
use curve_sniper::tx_builder::{InstructionPlan, TxTemplate};
use parking_lot::Mutex;
use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_instruction,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Signs its copy like a real channel, then accepts or refuses it
struct SigningChannel {
    name: &'static str,
    tip_accounts: Vec<Pubkey>,
    accepts: bool,
    delay: Duration,
    signed: Mutex<Vec<(usize, Signature)>>,
}

impl SigningChannel {
    fn new(name: &'static str, accepts: bool, delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            name,
            tip_accounts: vec![Pubkey::new_unique()],
            accepts,
            delay: Duration::from_millis(delay_ms),
            signed: Mutex::new(Vec::new()),
        })
    }

    fn signed(&self) -> Vec<(usize, Signature)> {
        self.signed.lock().clone()
    }
}

#[async_trait]
impl RelayChannel for SigningChannel {
    fn name(&self) -> &str {
        self.name
    }

    fn tip_instruction(&self, payer: &Pubkey, tip_lamports: u64) -> Option<Instruction> {
        random_tip(payer, &self.tip_accounts, tip_lamports)
    }

    async fn send_transaction(
        &self,
        wallet: Arc<Keypair>,
        tip_lamports: u64,
        template: &TxTemplate,
    ) -> Result<Signature, RelayError> {
        let tx = sign_for_channel(self, &wallet, tip_lamports, template)?;
        let signature = tx.signatures[0];
        self.signed
            .lock()
            .push((tx.message.instructions.len(), signature));
        tokio::time::sleep(self.delay).await;
        if self.accepts {
            Ok(signature)
        } else {
            Err(RelayError::Transport {
                endpoint: self.name.to_string(),
                message: "connection refused".to_string(),
            })
        }
    }
}

fn template(wallet: &Keypair) -> Arc<TxTemplate> {
    let ix = system_instruction::transfer(&wallet.pubkey(), &Pubkey::new_unique(), 5_000);
    Arc::new(TxTemplate::from_plan(
        wallet.pubkey(),
        InstructionPlan::new(vec![ix], false),
        Hash::new_unique(),
    ))
}

#[tokio::test]
async fn test_second_of_three_channels_wins() {
    let wallet = Arc::new(Keypair::new());
    let first = SigningChannel::new("bundle", false, 1);
    let second = SigningChannel::new("grpc", true, 10);
    let third = SigningChannel::new("rpc", false, 2);
    let channels: Vec<Arc<dyn RelayChannel>> = vec![first.clone(), second.clone(), third.clone()];
    let racer = RelayRacer::new(channels, Duration::from_secs(2));

    let win = racer
        .race(Arc::clone(&wallet), 10_000, template(&wallet))
        .await
        .unwrap();
    assert_eq!(win.channel, "grpc");

    let (instructions, signature) = second.signed()[0];
    assert_eq!(win.signature, signature);
    // the shared transfer plus this channel's tip
    assert_eq!(instructions, 2);

    // losers were attempted with their own signed copies
    let signatures: HashSet<Signature> = [signature, first.signed()[0].1, third.signed()[0].1]
        .into_iter()
        .collect();
    assert_eq!(signatures.len(), 3);
}

#[tokio::test]
async fn test_untipped_copy_keeps_template_instructions() {
    let wallet = Arc::new(Keypair::new());
    let channel = SigningChannel::new("rpc", true, 0);
    let racer = RelayRacer::new(vec![channel.clone() as Arc<dyn RelayChannel>], Duration::from_secs(1));

    racer.race(Arc::clone(&wallet), 0, template(&wallet)).await.unwrap();
    assert_eq!(channel.signed()[0].0, 1);
}

#[tokio::test]
async fn test_every_channel_failing_fails_the_race() {
    let wallet = Arc::new(Keypair::new());
    let channels: Vec<Arc<dyn RelayChannel>> = vec![
        SigningChannel::new("bundle", false, 1),
        SigningChannel::new("grpc", false, 3),
        SigningChannel::new("rpc", false, 2),
    ];
    let racer = RelayRacer::new(channels, Duration::from_secs(2));

    let err = racer
        .race(Arc::clone(&wallet), 1_000, template(&wallet))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::AllChannelsFailed { count: 3, .. }));
}
