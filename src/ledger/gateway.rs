//! JSON HTTP client for the ledger gateway.
//!
//! The gateway fronts the vault contracts, the swap router and the token
//! contracts behind a small REST surface. Position amounts travel as raw
//! integer strings in the vault's configured decimals; token endpoints
//! return `{ "raw", "decimals" }` because the client does not know every
//! token's precision.
//!
//! Auth: `Authorization: Bearer {token}` on every request when a token is
//! configured.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Ledger, Session, SwapExecutor, TokenAccounts};
use crate::amount::Amount;
use crate::types::{
    Address, CreatePositionRequest, Deadline, Decimals, InterestRateMode, Position, PositionKey,
    SwapReceipt, TakeInstruction, TakePreview,
};

// ---------------------------------------------------------------------------
// Wire types (gateway JSON -> Rust)
// ---------------------------------------------------------------------------

/// A position as the gateway returns it. Every field is required.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRecord {
    collateral_token: String,
    debt_token: String,
    collateral_amount: String,
    /// Signed on the ledger; only the magnitude is meaningful.
    debt_amount: String,
    principal: String,
    interest_rate_mode: u8,
    expect_profit: String,
    deadline: i64,
}

impl PositionRecord {
    fn into_position(self, key: PositionKey, decimals: Decimals) -> Result<Position> {
        let debt_raw = self
            .debt_amount
            .trim()
            .parse::<i128>()
            .with_context(|| format!("Bad debtAmount '{}'", self.debt_amount))?
            .unsigned_abs();

        Ok(Position {
            key,
            collateral_token: Address::parse(&self.collateral_token)?,
            debt_token: Address::parse(&self.debt_token)?,
            collateral_amount: parse_raw(&self.collateral_amount, decimals.collateral, "collateralAmount")?,
            debt_amount: Amount::new(debt_raw, decimals.debt),
            principal: parse_raw(&self.principal, decimals.debt, "principal")?,
            interest_rate_mode: InterestRateMode::try_from(self.interest_rate_mode)?,
            expect_profit: parse_raw(&self.expect_profit, decimals.debt, "expectProfit")?,
            deadline: Deadline::try_from(self.deadline)?,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePositionBody<'a> {
    collateral_token: &'a Address,
    collateral_amount: String,
    debt_token: &'a Address,
    debt_amount: String,
    principal: String,
    interest_rate_mode: u8,
    expect_profit: String,
    deadline: i64,
}

impl<'a> From<&'a CreatePositionRequest> for CreatePositionBody<'a> {
    fn from(r: &'a CreatePositionRequest) -> Self {
        Self {
            collateral_token: &r.collateral_token,
            collateral_amount: r.collateral_amount.raw().to_string(),
            debt_token: &r.debt_token,
            debt_amount: r.debt_amount.raw().to_string(),
            principal: r.principal.raw().to_string(),
            interest_rate_mode: r.interest_rate_mode.into(),
            expect_profit: r.expect_profit.raw().to_string(),
            deadline: r.deadline.timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapBody<'a> {
    id: String,
    from: &'a Address,
    token_in: &'a Address,
    token_out: &'a Address,
    amount_in: String,
    min_amount_out: String,
    positions: &'a [PositionKey],
}

#[derive(Debug, Serialize)]
struct ApproveBody<'a> {
    from: &'a Address,
    spender: &'a Address,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct OwnerResponse {
    owner: String,
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewResponse {
    debt_input: String,
    collateral_output: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    tx_hash: String,
}

fn parse_raw(text: &str, decimals: u32, field: &str) -> Result<Amount> {
    let raw = text
        .trim()
        .parse::<u128>()
        .with_context(|| format!("Bad {field} '{text}'"))?;
    Ok(Amount::new(raw, decimals))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GatewayClient {
    http: Client,
    base_url: String,
    token: Option<SecretString>,
    caller: Address,
    decimals: Decimals,
}

impl GatewayClient {
    /// Create a new gateway client acting as `caller`.
    ///
    /// Without a token the client can still read, but [`Session::can_sign`]
    /// reports `false`.
    pub fn new(base_url: &str, token: Option<SecretString>, caller: Address, decimals: Decimals) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("takeover/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for ledger gateway")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            caller,
            decimals,
        })
    }

    // -- URL builders ----------------------------------------------------

    fn vault_url(&self, vault: &Address, tail: &str) -> String {
        format!("{}/vaults/{}{tail}", self.base_url, urlencoding::encode(vault.as_str()))
    }

    fn position_url(&self, vault: &Address, id: u64, tail: &str) -> String {
        self.vault_url(vault, &format!("/positions/{id}{tail}"))
    }

    fn token_url(&self, token: &Address, tail: &str) -> String {
        format!("{}/tokens/{}{tail}", self.base_url, urlencoding::encode(token.as_str()))
    }

    // -- Transport -------------------------------------------------------

    fn authorised(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token.expose_secret()),
            None => req,
        }
    }

    async fn checked(resp: Response, what: &str) -> Result<Response> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gateway {what} failed {status}: {body}");
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        debug!(url = %url, "Gateway GET");
        let resp = self
            .authorised(self.http.get(url))
            .send()
            .await
            .with_context(|| format!("Gateway {what} request failed"))?;
        Self::checked(resp, what)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse gateway {what} response"))
    }

    async fn post(&self, url: &str, body: &impl Serialize, what: &str) -> Result<Response> {
        debug!(url = %url, "Gateway POST");
        let resp = self
            .authorised(self.http.post(url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Gateway {what} request failed"))?;
        Self::checked(resp, what).await
    }
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl Ledger for GatewayClient {
    async fn total_positions(&self, vault: &Address) -> Result<u64> {
        let url = self.vault_url(vault, "/positions/count");
        let resp: CountResponse = self.get_json(&url, "position count").await?;
        Ok(resp.count)
    }

    async fn position_by_id(&self, vault: &Address, id: u64) -> Result<Position> {
        let url = self.position_url(vault, id, "");
        let record: PositionRecord = self.get_json(&url, "position").await?;
        record
            .into_position(PositionKey::new(vault.clone(), id), self.decimals)
            .with_context(|| format!("Failed to decode position {vault}#{id}"))
    }

    async fn owner(&self, vault: &Address) -> Result<Address> {
        let url = self.vault_url(vault, "/owner");
        let resp: OwnerResponse = self.get_json(&url, "vault owner").await?;
        Ok(Address::parse(&resp.owner)?)
    }

    async fn create_position(&self, vault: &Address, request: &CreatePositionRequest) -> Result<u64> {
        let url = self.vault_url(vault, "/positions");
        let created: CreatedResponse = self
            .post(&url, &CreatePositionBody::from(request), "create position")
            .await?
            .json()
            .await
            .context("Failed to parse gateway create position response")?;
        info!(vault = %vault, id = created.id, "Gateway created position");
        Ok(created.id)
    }

    async fn close_position(&self, vault: &Address, id: u64) -> Result<()> {
        let url = self.position_url(vault, id, "/close");
        self.post(&url, &serde_json::json!({ "from": self.caller }), "close position")
            .await?;
        Ok(())
    }

    async fn preview_take(&self, vault: &Address, id: u64, amount: &Amount) -> Result<TakePreview> {
        let url = self.position_url(vault, id, &format!("/preview-take?amount={}", amount.raw()));
        let resp: PreviewResponse = self.get_json(&url, "take preview").await?;
        Ok(TakePreview {
            debt_input: parse_raw(&resp.debt_input, self.decimals.debt, "debtInput")?,
            collateral_output: parse_raw(&resp.collateral_output, self.decimals.collateral, "collateralOutput")?,
        })
    }
}

#[async_trait]
impl SwapExecutor for GatewayClient {
    async fn execute(&self, instruction: &TakeInstruction) -> Result<SwapReceipt> {
        let url = format!("{}/router/swap", self.base_url);
        let body = SwapBody {
            id: instruction.id.to_string(),
            from: &self.caller,
            token_in: &instruction.token_in,
            token_out: &instruction.token_out,
            amount_in: instruction.amount_in.raw().to_string(),
            min_amount_out: instruction.min_amount_out.raw().to_string(),
            positions: &instruction.positions,
        };
        let resp: SwapResponse = self
            .post(&url, &body, "swap")
            .await?
            .json()
            .await
            .context("Failed to parse gateway swap response")?;

        Ok(SwapReceipt {
            tx_hash: resp.tx_hash,
            instruction_id: instruction.id,
            amount_in: instruction.amount_in,
            timestamp: chrono::Utc::now(),
        })
    }
}

#[async_trait]
impl TokenAccounts for GatewayClient {
    async fn allowance(&self, token: &Address, owner: &Address, spender: &Address) -> Result<Amount> {
        let url = self.token_url(
            token,
            &format!(
                "/allowance?owner={}&spender={}",
                urlencoding::encode(owner.as_str()),
                urlencoding::encode(spender.as_str()),
            ),
        );
        self.get_json(&url, "allowance").await
    }

    async fn balance(&self, token: &Address, holder: &Address) -> Result<Amount> {
        let url = self.token_url(token, &format!("/balance?holder={}", urlencoding::encode(holder.as_str())));
        self.get_json(&url, "balance").await
    }

    async fn approve(&self, token: &Address, spender: &Address, amount: &Amount) -> Result<()> {
        let url = self.token_url(token, "/approve");
        let body = ApproveBody {
            from: &self.caller,
            spender,
            amount: amount.raw().to_string(),
        };
        self.post(&url, &body, "approve").await?;
        info!(token = %token, spender = %spender, amount = %amount, "Gateway approved spender");
        Ok(())
    }
}

impl Session for GatewayClient {
    fn address(&self) -> Address {
        self.caller.clone()
    }

    fn can_sign(&self) -> bool {
        self.token.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
