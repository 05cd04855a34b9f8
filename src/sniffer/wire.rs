//! JSON wire format of the upstream swap parser
//!
//! Addresses and signatures travel as base58 strings, amounts as numbers,
//! the dynamic-bonding-curve sqrt price as a decimal string (it does not
//! fit in a JSON double).

use crate::sniffer::errors::SnifferError;
use crate::types::{
    CreateInstructionInfo, LaunchpadPool, MeteoraDbcPool, PoolData, PumpAmmPool, PumpFunPool,
    SwapEvent,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use smallvec::SmallVec;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::str::FromStr;

fn pubkey<'de, D: Deserializer<'de>>(d: D) -> Result<Pubkey, D::Error> {
    let s = String::deserialize(d)?;
    Pubkey::from_str(&s).map_err(serde::de::Error::custom)
}

fn pubkeys<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Pubkey>, D::Error> {
    let list = Vec::<String>::deserialize(d)?;
    list.iter()
        .map(|s| Pubkey::from_str(s).map_err(serde::de::Error::custom))
        .collect()
}

fn decimal_u128<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
    let s = String::deserialize(d)?;
    s.parse().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "venue", rename_all_fields = "camelCase")]
enum WirePool {
    PumpFun {
        #[serde(deserialize_with = "pubkey")]
        creator: Pubkey,
        virtual_sol_reserves: u64,
        virtual_token_reserves: u64,
        real_sol_reserves: u64,
        real_token_reserves: u64,
    },
    PumpAmm {
        #[serde(deserialize_with = "pubkey")]
        pool: Pubkey,
        #[serde(deserialize_with = "pubkey")]
        coin_creator: Pubkey,
        #[serde(deserialize_with = "pubkey")]
        protocol_fee_recipient: Pubkey,
        base_reserves: u64,
        quote_reserves: u64,
    },
    MeteoraDbc {
        #[serde(deserialize_with = "pubkey")]
        config: Pubkey,
        #[serde(deserialize_with = "pubkey")]
        pool: Pubkey,
        #[serde(deserialize_with = "pubkey")]
        base_vault: Pubkey,
        #[serde(deserialize_with = "pubkey")]
        quote_vault: Pubkey,
        #[serde(deserialize_with = "pubkey")]
        token_base_program: Pubkey,
        #[serde(deserialize_with = "decimal_u128")]
        next_sqrt_price: u128,
    },
    RaydiumLaunchpad {
        #[serde(deserialize_with = "pubkey")]
        pool_state: Pubkey,
        #[serde(deserialize_with = "pubkey")]
        global_config: Pubkey,
        #[serde(deserialize_with = "pubkey")]
        platform_config: Pubkey,
        #[serde(deserialize_with = "pubkey")]
        base_vault: Pubkey,
        #[serde(deserialize_with = "pubkey")]
        quote_vault: Pubkey,
        real_base: u64,
        real_quote: u64,
    },
}

impl From<WirePool> for PoolData {
    fn from(pool: WirePool) -> Self {
        match pool {
            WirePool::PumpFun {
                creator,
                virtual_sol_reserves,
                virtual_token_reserves,
                real_sol_reserves,
                real_token_reserves,
            } => PoolData::PumpFun(PumpFunPool {
                creator,
                virtual_sol_reserves,
                virtual_token_reserves,
                real_sol_reserves,
                real_token_reserves,
            }),
            WirePool::PumpAmm {
                pool,
                coin_creator,
                protocol_fee_recipient,
                base_reserves,
                quote_reserves,
            } => PoolData::PumpAmm(PumpAmmPool {
                pool,
                coin_creator,
                protocol_fee_recipient,
                base_reserves,
                quote_reserves,
            }),
            WirePool::MeteoraDbc {
                config,
                pool,
                base_vault,
                quote_vault,
                token_base_program,
                next_sqrt_price,
            } => PoolData::MeteoraDbc(MeteoraDbcPool {
                config,
                pool,
                base_vault,
                quote_vault,
                token_base_program,
                next_sqrt_price,
            }),
            WirePool::RaydiumLaunchpad {
                pool_state,
                global_config,
                platform_config,
                base_vault,
                quote_vault,
                real_base,
                real_quote,
            } => PoolData::RaydiumLaunchpad(LaunchpadPool {
                pool_state,
                global_config,
                platform_config,
                base_vault,
                quote_vault,
                real_base,
                real_quote,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCreate {
    discriminator: [u8; 8],
    account_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSwapEvent {
    signature: String,
    #[serde(deserialize_with = "pubkeys")]
    signers: Vec<Pubkey>,
    slot: u64,
    /// Unix milliseconds; receive time when absent
    #[serde(default)]
    timestamp_ms: Option<i64>,
    #[serde(deserialize_with = "pubkey")]
    input_mint: Pubkey,
    #[serde(deserialize_with = "pubkey")]
    output_mint: Pubkey,
    input_amount: u64,
    output_amount: u64,
    #[serde(default)]
    pool: Option<WirePool>,
    #[serde(default, deserialize_with = "pubkeys")]
    matched_accounts: Vec<Pubkey>,
    #[serde(default)]
    create_instruction: Option<WireCreate>,
}

/// Decode one feed message into a swap event
pub fn parse_event(text: &str) -> Result<SwapEvent, SnifferError> {
    let wire: WireSwapEvent =
        serde_json::from_str(text).map_err(|e| SnifferError::Parse(e.to_string()))?;
    if wire.signers.is_empty() {
        return Err(SnifferError::Parse("event has no signers".to_string()));
    }
    let signature = Signature::from_str(&wire.signature)
        .map_err(|e| SnifferError::Parse(format!("signature: {e}")))?;
    let timestamp: DateTime<Utc> = wire
        .timestamp_ms
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Ok(SwapEvent {
        signature,
        signers: SmallVec::from_vec(wire.signers),
        slot: wire.slot,
        timestamp,
        input_mint: wire.input_mint,
        output_mint: wire.output_mint,
        input_amount: wire.input_amount,
        output_amount: wire.output_amount,
        pool: wire.pool.map(PoolData::from),
        matched_accounts: SmallVec::from_vec(wire.matched_accounts),
        create_instruction: wire.create_instruction.map(|c| CreateInstructionInfo {
            discriminator: c.discriminator,
            account_count: c.account_count,
        }),
    })
}
