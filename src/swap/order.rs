//! Cross-chain order construction
//!
//! Builds a single-fill limit order carrying the escrow extension the factory
//! reads on fill: auction getters, resolver whitelist and the 160-byte escrow
//! args (hashlock, destination chain and token, deposits, timelocks). The order
//! hash is the EIP-712 digest the maker signs.

use super::abi;
use super::address::{ChainAddress, TokenRef};
use super::route::ChainDescriptor;
use super::secret::HashLock;
use super::timelock::TimeLocks;
use crate::error::{ResolverError, ResolverResult};

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{Eip712Domain, SolStruct};
use ethers::types::{RecoveryMessage, Signature as EthSignature, H256};
use serde::{Deserialize, Serialize};

const DOMAIN_NAME: &str = "1inch Limit Order Protocol";
const DOMAIN_VERSION: &str = "4";

// MakerTraits flags and fields
const NO_PARTIAL_FILLS_FLAG: usize = 255;
const ALLOW_MULTIPLE_FILLS_FLAG: usize = 254;
const POST_INTERACTION_CALL_FLAG: usize = 251;
const HAS_EXTENSION_FLAG: usize = 249;
const ALLOWED_SENDER_BITS: usize = 80;
const EXPIRATION_OFFSET: usize = 80;
const NONCE_OFFSET: usize = 120;
const UINT_40_MAX: u64 = (1 << 40) - 1;

const SALT_SEED_BITS: usize = 96;
const EXTENSION_HASH_BITS: usize = 160;
const SIGNATURE_LEN: usize = 65;

fn low_bits(bits: usize) -> U256 {
    (U256::from(1u8) << bits) - U256::from(1u8)
}

fn put_uint(out: &mut Vec<u8>, value: u64, width: usize, what: &str) -> ResolverResult<()> {
    if width < 8 && value >> (width * 8) != 0 {
        return Err(ResolverError::Encoding(format!(
            "{} ({}) does not fit in {} bytes",
            what, value, width
        )));
    }
    out.extend_from_slice(&value.to_be_bytes()[8 - width..]);
    Ok(())
}

/// Packed maker flags and fields of a limit order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MakerTraits(U256);

impl MakerTraits {
    pub fn value(&self) -> U256 {
        self.0
    }

    fn with_flag(self, bit: usize, on: bool) -> Self {
        let mask = U256::from(1u8) << bit;
        Self(if on { self.0 | mask } else { self.0 & !mask })
    }

    fn with_u40(self, offset: usize, value: u64, what: &str) -> ResolverResult<Self> {
        if value > UINT_40_MAX {
            return Err(ResolverError::Encoding(format!("{} {} exceeds 40 bits", what, value)));
        }
        let cleared = self.0 & !(U256::from(UINT_40_MAX) << offset);
        Ok(Self(cleared | (U256::from(value) << offset)))
    }

    fn u40(&self, offset: usize) -> u64 {
        ((self.0 >> offset) & U256::from(UINT_40_MAX)).to::<u64>()
    }

    pub fn with_nonce(self, nonce: u64) -> ResolverResult<Self> {
        self.with_u40(NONCE_OFFSET, nonce, "nonce")
    }

    pub fn with_expiration(self, expiration: u64) -> ResolverResult<Self> {
        self.with_u40(EXPIRATION_OFFSET, expiration, "expiration")
    }

    /// Only the low 80 bits of the sender are stored
    pub fn with_allowed_sender(self, sender: Address) -> Self {
        let mask = low_bits(ALLOWED_SENDER_BITS);
        let sender = U256::from_be_slice(sender.as_slice()) & mask;
        Self((self.0 & !mask) | sender)
    }

    pub fn nonce(&self) -> u64 {
        self.u40(NONCE_OFFSET)
    }

    pub fn expiration(&self) -> u64 {
        self.u40(EXPIRATION_OFFSET)
    }

    pub fn allows_partial_fills(&self) -> bool {
        !self.0.bit(NO_PARTIAL_FILLS_FLAG)
    }

    pub fn allows_multiple_fills(&self) -> bool {
        self.0.bit(ALLOW_MULTIPLE_FILLS_FLAG)
    }

    pub fn has_extension(&self) -> bool {
        self.0.bit(HAS_EXTENSION_FLAG)
    }

    pub fn has_post_interaction(&self) -> bool {
        self.0.bit(POST_INTERACTION_CALL_FLAG)
    }
}

/// Piecewise-linear rate bump point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionPoint {
    pub coefficient: u32,
    pub delay: u16,
}

/// Dutch auction parameters read by the amount getters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionDetails {
    pub start_time: u32,
    pub duration: u32,
    #[serde(default)]
    pub initial_rate_bump: u32,
    #[serde(default)]
    pub points: Vec<AuctionPoint>,
    #[serde(default)]
    pub gas_bump_estimate: u32,
    #[serde(default)]
    pub gas_price_estimate: u32,
}

impl AuctionDetails {
    pub fn encode(&self) -> ResolverResult<Vec<u8>> {
        let mut out = Vec::with_capacity(17 + self.points.len() * 5);
        put_uint(&mut out, self.gas_bump_estimate as u64, 3, "gas bump estimate")?;
        put_uint(&mut out, self.gas_price_estimate as u64, 4, "gas price estimate")?;
        put_uint(&mut out, self.start_time as u64, 4, "auction start")?;
        put_uint(&mut out, self.duration as u64, 3, "auction duration")?;
        put_uint(&mut out, self.initial_rate_bump as u64, 3, "initial rate bump")?;
        for point in &self.points {
            put_uint(&mut out, point.coefficient as u64, 3, "point coefficient")?;
            put_uint(&mut out, point.delay as u64, 2, "point delay")?;
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub address: Address,
    /// Unix time from which this resolver may fill
    pub allow_from: u32,
}

/// Resolvers permitted to fill the order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Whitelist {
    pub resolving_start_time: u32,
    pub entries: Vec<WhitelistEntry>,
}

impl Whitelist {
    pub fn is_allowed(&self, resolver: Address, at: u64) -> bool {
        self.entries.iter().any(|entry| {
            entry.address == resolver
                && at >= entry.allow_from.max(self.resolving_start_time) as u64
        })
    }

    /// Start time, count, then per entry the low 10 address bytes and the delay
    /// since the previous entry.
    pub fn encode(&self) -> ResolverResult<Vec<u8>> {
        if self.entries.len() > u8::MAX as usize {
            return Err(ResolverError::Encoding(format!(
                "whitelist has {} entries, at most 255 allowed",
                self.entries.len()
            )));
        }
        let mut entries = self.entries.clone();
        entries.sort_by_key(|e| e.allow_from);

        let mut out = Vec::with_capacity(5 + entries.len() * 12);
        put_uint(&mut out, self.resolving_start_time as u64, 4, "resolving start")?;
        put_uint(&mut out, entries.len() as u64, 1, "whitelist size")?;
        let mut previous = self.resolving_start_time;
        for entry in &entries {
            out.extend_from_slice(&entry.address.as_slice()[10..]);
            let delay = entry.allow_from.saturating_sub(previous);
            put_uint(&mut out, delay as u64, 2, "whitelist delay")?;
            previous = previous.max(entry.allow_from);
        }
        Ok(out)
    }
}

/// Maker-side order terms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderParams {
    /// Maker on the source chain
    pub maker: ChainAddress,
    /// Maker's address on the destination chain
    pub receiver: ChainAddress,
    pub maker_asset: TokenRef,
    pub taker_asset: TokenRef,
    pub making_amount: U256,
    pub taking_amount: U256,
    /// EVM key authorizing the order. Defaults to the maker on EVM chains.
    #[serde(default)]
    pub signer: Option<Address>,
    pub salt_seed: u128,
}

/// Escrow terms shared by both legs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowParams {
    pub hash_lock: HashLock,
    pub timelocks: TimeLocks,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub src_safety_deposit: U256,
    pub dst_safety_deposit: U256,
}

impl EscrowParams {
    /// Factory extra-data args: hashlock, dst chain, dst token, deposits, timelocks
    fn extra_data(&self, dst_token: &TokenRef) -> ResolverResult<Vec<u8>> {
        let limit = low_bits(128);
        if self.src_safety_deposit > limit || self.dst_safety_deposit > limit {
            return Err(ResolverError::Encoding(
                "safety deposits must fit in 128 bits".to_string(),
            ));
        }
        let deposits: U256 = (self.src_safety_deposit << 128usize) | self.dst_safety_deposit;

        let mut out = Vec::with_capacity(160);
        out.extend_from_slice(self.hash_lock.value().as_slice());
        out.extend_from_slice(&U256::from(self.dst_chain_id).to_be_bytes::<32>());
        out.extend_from_slice(dst_token.word().as_slice());
        out.extend_from_slice(&deposits.to_be_bytes::<32>());
        out.extend_from_slice(&self.timelocks.pack().to_be_bytes::<32>());
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillPolicy {
    pub nonce: u64,
    #[serde(default)]
    pub allow_partial_fills: bool,
    #[serde(default)]
    pub allow_multiple_fills: bool,
    #[serde(default)]
    pub expiration: Option<u64>,
}

/// Order extension fields in protocol order, followed by custom data
#[derive(Default)]
struct Extension {
    maker_asset_suffix: Vec<u8>,
    taker_asset_suffix: Vec<u8>,
    making_amount_data: Vec<u8>,
    taking_amount_data: Vec<u8>,
    predicate: Vec<u8>,
    maker_permit: Vec<u8>,
    pre_interaction: Vec<u8>,
    post_interaction: Vec<u8>,
    custom_data: Vec<u8>,
}

impl Extension {
    /// 32-byte offsets word (cumulative uint32 ends, field 0 lowest) then data
    fn encode(&self) -> ResolverResult<Bytes> {
        let fields = [
            &self.maker_asset_suffix,
            &self.taker_asset_suffix,
            &self.making_amount_data,
            &self.taking_amount_data,
            &self.predicate,
            &self.maker_permit,
            &self.pre_interaction,
            &self.post_interaction,
        ];
        if fields.iter().all(|f| f.is_empty()) && self.custom_data.is_empty() {
            return Ok(Bytes::new());
        }

        let mut offsets = U256::ZERO;
        let mut end: usize = 0;
        let mut body = Vec::new();
        for (i, field) in fields.iter().enumerate() {
            end += field.len();
            if end > u32::MAX as usize {
                return Err(ResolverError::Encoding("extension too large".to_string()));
            }
            offsets |= U256::from(end as u32) << (32 * i);
            body.extend_from_slice(field);
        }

        let mut out = offsets.to_be_bytes::<32>().to_vec();
        out.extend_from_slice(&body);
        out.extend_from_slice(&self.custom_data);
        Ok(out.into())
    }
}

/// EIP-712 domain of the order's source chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDomain {
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl OrderDomain {
    /// Limit order protocol when configured, otherwise the source factory's identity
    pub fn for_chain(chain: &ChainDescriptor) -> Self {
        let contract = chain
            .limit_order_protocol
            .as_ref()
            .unwrap_or(&chain.src_factory);
        Self {
            chain_id: chain.chain_id,
            verifying_contract: contract.evm_identity(),
        }
    }

    pub fn eip712(&self) -> Eip712Domain {
        Eip712Domain::new(
            Some(DOMAIN_NAME.into()),
            Some(DOMAIN_VERSION.into()),
            Some(U256::from(self.chain_id)),
            Some(self.verifying_contract),
            None,
        )
    }
}

/// Maker-signed cross-chain intent, immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainOrder {
    params: OrderParams,
    escrow: EscrowParams,
    auction: AuctionDetails,
    whitelist: Whitelist,
    maker_traits: MakerTraits,
    salt: U256,
    extension: Bytes,
    domain: OrderDomain,
    authorizer: Address,
    order_hash: B256,
}

impl CrossChainOrder {
    pub fn new(
        domain: OrderDomain,
        factory: &ChainAddress,
        params: OrderParams,
        escrow: EscrowParams,
        auction: AuctionDetails,
        whitelist: Whitelist,
        policy: FillPolicy,
    ) -> ResolverResult<Self> {
        if policy.allow_partial_fills || policy.allow_multiple_fills {
            return Err(ResolverError::Configuration(
                "only single-fill orders are supported".to_string(),
            ));
        }
        if params.making_amount.is_zero() || params.taking_amount.is_zero() {
            return Err(ResolverError::Configuration(
                "order amounts must be non-zero".to_string(),
            ));
        }
        if escrow.src_chain_id != domain.chain_id {
            return Err(ResolverError::Configuration(format!(
                "order domain chain {} differs from source chain {}",
                domain.chain_id, escrow.src_chain_id
            )));
        }
        let authorizer = match (params.signer, &params.maker) {
            (Some(signer), _) => signer,
            (None, ChainAddress::Evm(maker)) => *maker,
            (None, ChainAddress::Tezos(maker)) => {
                return Err(ResolverError::Configuration(format!(
                    "Tezos maker {} needs an explicit order signer",
                    maker
                )))
            }
        };

        let factory_prefix = factory.evm_identity();
        let mut amount_data = factory_prefix.to_vec();
        amount_data.extend_from_slice(&auction.encode()?);

        let mut post_interaction = factory_prefix.to_vec();
        post_interaction.extend_from_slice(&whitelist.encode()?);
        post_interaction.extend_from_slice(&escrow.extra_data(&params.taker_asset)?);

        let extension = Extension {
            making_amount_data: amount_data.clone(),
            taking_amount_data: amount_data,
            post_interaction,
            ..Default::default()
        }
        .encode()?;

        let maker_traits = MakerTraits::default()
            .with_flag(NO_PARTIAL_FILLS_FLAG, true)
            .with_flag(ALLOW_MULTIPLE_FILLS_FLAG, false)
            .with_flag(HAS_EXTENSION_FLAG, true)
            .with_flag(POST_INTERACTION_CALL_FLAG, true)
            .with_nonce(policy.nonce)?
            .with_expiration(policy.expiration.unwrap_or_default())?;

        let seed = U256::from(params.salt_seed) & low_bits(SALT_SEED_BITS);
        let extension_hash = U256::from_be_bytes(keccak256(&extension).0);
        let salt = (seed << EXTENSION_HASH_BITS) | (extension_hash & low_bits(EXTENSION_HASH_BITS));

        let mut order = Self {
            params,
            escrow,
            auction,
            whitelist,
            maker_traits,
            salt,
            extension,
            domain,
            authorizer,
            order_hash: B256::ZERO,
        };
        order.order_hash = order.typed_data_hash();
        Ok(order)
    }

    /// Order as hashed and signed
    pub fn to_sol(&self) -> abi::Order {
        abi::Order {
            salt: self.salt,
            maker: self.params.maker.evm_identity(),
            receiver: self.params.receiver.evm_identity(),
            makerAsset: self.params.maker_asset.evm_identity(),
            takerAsset: self.params.taker_asset.evm_identity(),
            makingAmount: self.params.making_amount,
            takingAmount: self.params.taking_amount,
            makerTraits: self.maker_traits.value(),
        }
    }

    /// Order as passed in resolver calldata
    pub fn to_args(&self) -> abi::OrderArgs {
        let order = self.to_sol();
        let word = |a: Address| U256::from_be_bytes(a.into_word().0);
        abi::OrderArgs {
            salt: order.salt,
            maker: word(order.maker),
            receiver: word(order.receiver),
            makerAsset: word(order.makerAsset),
            takerAsset: word(order.takerAsset),
            makingAmount: order.makingAmount,
            takingAmount: order.takingAmount,
            makerTraits: order.makerTraits,
        }
    }

    pub fn typed_data_hash(&self) -> B256 {
        self.to_sol().eip712_signing_hash(&self.domain.eip712())
    }

    pub fn order_hash(&self) -> B256 {
        self.order_hash
    }

    /// Reject a signature that does not recover to the order's authorizer
    pub fn verify_signature(&self, signature: &OrderSignature) -> ResolverResult<()> {
        match signature.recover(self.order_hash) {
            Ok(recovered) if recovered == self.authorizer => Ok(()),
            other => Err(ResolverError::SignatureMismatch {
                order_hash: self.order_hash.to_string(),
                expected: self.authorizer.to_string(),
                recovered: other
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "none".to_string()),
            }),
        }
    }

    pub fn params(&self) -> &OrderParams {
        &self.params
    }

    pub fn maker(&self) -> &ChainAddress {
        &self.params.maker
    }

    pub fn receiver(&self) -> &ChainAddress {
        &self.params.receiver
    }

    pub fn maker_asset(&self) -> &TokenRef {
        &self.params.maker_asset
    }

    pub fn taker_asset(&self) -> &TokenRef {
        &self.params.taker_asset
    }

    pub fn making_amount(&self) -> U256 {
        self.params.making_amount
    }

    pub fn taking_amount(&self) -> U256 {
        self.params.taking_amount
    }

    pub fn escrow(&self) -> &EscrowParams {
        &self.escrow
    }

    pub fn auction(&self) -> &AuctionDetails {
        &self.auction
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    pub fn maker_traits(&self) -> MakerTraits {
        self.maker_traits
    }

    pub fn salt(&self) -> U256 {
        self.salt
    }

    pub fn extension(&self) -> &Bytes {
        &self.extension
    }

    pub fn domain(&self) -> &OrderDomain {
        &self.domain
    }

    pub fn authorizer(&self) -> Address {
        self.authorizer
    }
}

/// 65-byte `r || s || v` signature over the order hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSignature(Bytes);

impl OrderSignature {
    pub fn from_bytes(bytes: &[u8]) -> ResolverResult<Self> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(ResolverError::Encoding(format!(
                "signature must be {} bytes, got {}",
                SIGNATURE_LEN,
                bytes.len()
            )));
        }
        Ok(Self(Bytes::copy_from_slice(bytes)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Compact wire form: `r` and `vs = s | yParity << 255`
    pub fn parts(&self) -> (B256, B256) {
        let r = B256::from_slice(&self.0[..32]);
        let mut vs = B256::from_slice(&self.0[32..64]);
        let v = self.0[64];
        let y_parity = if v >= 27 { v - 27 } else { v };
        if y_parity & 1 == 1 {
            vs.0[0] |= 0x80;
        }
        (r, vs)
    }

    pub fn recover(&self, hash: B256) -> ResolverResult<Address> {
        let signature = EthSignature::try_from(&self.0[..])
            .map_err(|e| ResolverError::Encoding(format!("Malformed signature: {}", e)))?;
        let signer = signature
            .recover(RecoveryMessage::Hash(H256::from(hash.0)))
            .map_err(|e| ResolverError::Encoding(format!("Signature recovery failed: {}", e)))?;
        Ok(Address::from(signer.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::fixtures::{sample_order, sign, single_fill};

    #[test]
    fn test_partial_and_multiple_fills_rejected() {
        let partial = FillPolicy {
            allow_partial_fills: true,
            ..single_fill()
        };
        assert!(matches!(
            sample_order(partial),
            Err(ResolverError::Configuration(_))
        ));

        let multiple = FillPolicy {
            allow_multiple_fills: true,
            ..single_fill()
        };
        assert!(matches!(
            sample_order(multiple),
            Err(ResolverError::Configuration(_))
        ));
    }

    #[test]
    fn test_order_is_deterministic() {
        let a = sample_order(single_fill()).unwrap();
        let b = sample_order(single_fill()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.order_hash(), b.order_hash());
        assert_eq!(a.order_hash(), a.typed_data_hash());
        assert_ne!(a.order_hash(), B256::ZERO);
    }

    #[test]
    fn test_maker_traits_single_fill() {
        let order = sample_order(single_fill()).unwrap();
        let traits = order.maker_traits();
        assert!(!traits.allows_partial_fills());
        assert!(!traits.allows_multiple_fills());
        assert!(traits.has_extension());
        assert!(traits.has_post_interaction());
        assert_eq!(traits.nonce(), 7);
        assert!(MakerTraits::default().with_nonce(1 << 40).is_err());
    }

    #[test]
    fn test_salt_binds_extension() {
        let order = sample_order(single_fill()).unwrap();
        let extension_hash = U256::from_be_bytes(keccak256(order.extension()).0);
        let mask = low_bits(EXTENSION_HASH_BITS);
        assert_eq!(order.salt() & mask, extension_hash & mask);
        assert_eq!(order.salt() >> EXTENSION_HASH_BITS, U256::from(42u64));
    }

    #[test]
    fn test_extension_tail_is_escrow_args() {
        let order = sample_order(single_fill()).unwrap();
        let extension = order.extension();

        let offsets = U256::from_be_slice(&extension[..32]);
        let word: U256 = (offsets >> (32usize * 7)) & U256::from(u32::MAX);
        let post_interaction_end = word.to::<u64>();
        assert_eq!(post_interaction_end as usize, extension.len() - 32);

        let tail = &extension[extension.len() - 160..];
        assert_eq!(&tail[..32], order.escrow().hash_lock.value().as_slice());
        assert_eq!(
            U256::from_be_slice(&tail[32..64]),
            U256::from(order.escrow().dst_chain_id)
        );
        assert_eq!(U256::from_be_slice(&tail[128..]), order.escrow().timelocks.pack());
    }

    #[test]
    fn test_signature_round_trip() {
        let order = sample_order(single_fill()).unwrap();
        let signature = sign(&order);
        assert!(order.verify_signature(&signature).is_ok());

        let mut tampered = signature.as_bytes().to_vec();
        tampered[10] ^= 0x01;
        let tampered = OrderSignature::from_bytes(&tampered).unwrap();
        assert!(matches!(
            order.verify_signature(&tampered),
            Err(ResolverError::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn test_compact_signature_parts() {
        let mut raw = [0u8; 65];
        raw[0] = 0xaa;
        raw[32] = 0x11;
        raw[64] = 28;
        let (r, vs) = OrderSignature::from_bytes(&raw).unwrap().parts();
        assert_eq!(r[0], 0xaa);
        assert_eq!(vs[0], 0x91);

        raw[64] = 27;
        let (_, vs) = OrderSignature::from_bytes(&raw).unwrap().parts();
        assert_eq!(vs[0], 0x11);

        assert!(OrderSignature::from_bytes(&raw[..64]).is_err());
    }

    #[test]
    fn test_auction_encoding_width() {
        let auction = AuctionDetails {
            start_time: 1,
            duration: 120,
            initial_rate_bump: 0,
            points: vec![AuctionPoint {
                coefficient: 10,
                delay: 60,
            }],
            gas_bump_estimate: 0,
            gas_price_estimate: 0,
        };
        assert_eq!(auction.encode().unwrap().len(), 17 + 5);

        let too_long = AuctionDetails {
            duration: 1 << 24,
            ..auction
        };
        assert!(too_long.encode().is_err());
    }

    #[test]
    fn test_whitelist_respects_start_time() {
        let resolver = Address::repeat_byte(0x33);
        let whitelist = Whitelist {
            resolving_start_time: 100,
            entries: vec![WhitelistEntry {
                address: resolver,
                allow_from: 50,
            }],
        };
        assert!(!whitelist.is_allowed(resolver, 99));
        assert!(whitelist.is_allowed(resolver, 100));
        assert!(!whitelist.is_allowed(Address::repeat_byte(0x44), 100));
    }
}
