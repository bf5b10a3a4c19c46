use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use super::{OutcomeSource, RoundRead, SourceError};
use crate::round::{
    Bet, BetKind, Chips, Color, DrawTimestamp, EpochMillis, Outcome, Participant, RoundSnapshot,
    Winner, MAX_NUMBER,
};

const LOG_TARGET: &str = "source::graphql";

const GAME_STATE_FIELDS: &str = r#"
    gameState {
      isSpinning
      currentBets { playerChainId playerName betType numbers amount }
      bettingEndTime
      lastResult {
        number
        color
        timestamp
        winners { playerChainId playerName betType betAmount payout }
      }
      history
    }"#;

const PLAYER_FIELDS: &str = "players { chainId name balance }";

const START_ROUND: &str = "mutation { startRound }";
const SPIN_WHEEL: &str = "mutation { spinWheel }";
const PLACE_BET: &str = "mutation PlaceBet($playerId: String!, $betType: BetType!, $numbers: [Int!]!, $amount: Int!) {
  placeBet(playerId: $playerId, betType: $betType, numbers: $numbers, amount: $amount)
}";
const REGISTER_PLAYER: &str = "mutation RegisterPlayer($playerId: String!, $name: String!, $initialBalance: Int!) {
  registerPlayer(playerId: $playerId, name: $name, initialBalance: $initialBalance)
}";

#[derive(Debug, Clone)]
pub struct GraphQlSourceConfig {
    /// Base URL of the node service, e.g. `http://localhost:8080`.
    pub node_url: Url,
    pub application_id: String,
    /// Chain mutations are submitted on (the local participant's chain).
    pub chain_id: String,
    /// Chain holding the shared round. Defaults to `chain_id` when the client hosts.
    pub host_chain_id: Option<String>,
    pub request_timeout: Duration,
}

impl GraphQlSourceConfig {
    fn application_url(&self, chain_id: &str) -> Result<Url, SourceError> {
        let mut url = self.node_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::Malformed(format!("{} cannot be a base url", self.node_url)))?
            .pop_if_empty()
            .extend(["chains", chain_id, "applications", &self.application_id]);
        Ok(url)
    }

    pub fn query_url(&self) -> Result<Url, SourceError> {
        self.application_url(self.host_chain_id.as_deref().unwrap_or(&self.chain_id))
    }

    pub fn mutation_url(&self) -> Result<Url, SourceError> {
        self.application_url(&self.chain_id)
    }
}

/// Talks to the roulette application's GraphQL service over HTTP.
#[derive(Debug, Clone)]
pub struct GraphQlOutcomeSource {
    client: Client,
    query_url: Url,
    mutation_url: Url,
}

impl GraphQlOutcomeSource {
    pub fn new(config: GraphQlSourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            query_url: config.query_url()?,
            mutation_url: config.mutation_url()?,
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        url: &Url,
        query: &str,
        variables: Value,
    ) -> Result<T, SourceError> {
        let response = self
            .client
            .post(url.clone())
            .json(&GraphQlRequest { query, variables })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                target: LOG_TARGET,
                %url,
                status = status.as_u16(),
                "graphql request failed"
            );
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        decode_response(&bytes)
    }

    async fn mutate(&self, mutation: &str, variables: Value) -> Result<(), SourceError> {
        let _: Value = self.execute(&self.mutation_url, mutation, variables).await?;
        debug!(target: LOG_TARGET, mutation = mutation_name(mutation), "mutation accepted");
        Ok(())
    }
}

#[async_trait]
impl OutcomeSource for GraphQlOutcomeSource {
    async fn read_round_snapshot(&self) -> Result<RoundSnapshot, SourceError> {
        let data: GameStateData = self
            .execute(
                &self.query_url,
                &format!("query {{{GAME_STATE_FIELDS}\n}}"),
                Value::Null,
            )
            .await?;
        Ok(data.game_state.into())
    }

    async fn read_participants(&self) -> Result<Vec<Participant>, SourceError> {
        let data: PlayersData = self
            .execute(&self.query_url, &format!("query {{ {PLAYER_FIELDS} }}"), Value::Null)
            .await?;
        Ok(data.players.into_iter().map(Into::into).collect())
    }

    async fn read_round(&self) -> Result<RoundRead, SourceError> {
        let data: RoundData = self
            .execute(
                &self.query_url,
                &format!("query {{{GAME_STATE_FIELDS}\n    {PLAYER_FIELDS}\n}}"),
                Value::Null,
            )
            .await?;
        Ok(RoundRead {
            snapshot: data.game_state.into(),
            participants: data.players.into_iter().map(Into::into).collect(),
        })
    }

    async fn start_round(&self) -> Result<(), SourceError> {
        self.mutate(START_ROUND, Value::Null).await
    }

    async fn draw_outcome(&self) -> Result<(), SourceError> {
        self.mutate(SPIN_WHEEL, Value::Null).await
    }

    async fn place_bet(
        &self,
        participant_id: &str,
        bet_kind: BetKind,
        numbers: &[u8],
        amount: Chips,
    ) -> Result<(), SourceError> {
        self.mutate(
            PLACE_BET,
            json!({
                "playerId": participant_id,
                "betType": bet_kind,
                "numbers": numbers,
                "amount": amount,
            }),
        )
        .await
    }

    async fn register_participant(
        &self,
        participant_id: &str,
        name: &str,
        initial_balance: Chips,
    ) -> Result<(), SourceError> {
        self.mutate(
            REGISTER_PLAYER,
            json!({
                "playerId": participant_id,
                "name": name,
                "initialBalance": initial_balance,
            }),
        )
        .await
    }
}

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    variables: Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlErrorEntry>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorEntry {
    #[serde(default)]
    message: String,
}

/// Splits a raw GraphQL response into data or error. A body that is not a GraphQL envelope
/// is a decode error; an envelope whose data has the wrong shape is malformed.
pub(crate) fn decode_response<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SourceError> {
    let envelope: GraphQlResponse = serde_json::from_slice(bytes)?;
    if let Some(first) = envelope.errors.into_iter().flatten().next() {
        let message = if first.message.is_empty() {
            "GraphQL error".to_string()
        } else {
            first.message
        };
        return Err(SourceError::GraphQl(message));
    }
    let data = envelope
        .data
        .ok_or_else(|| SourceError::Malformed("response carried no data".into()))?;
    serde_json::from_value(data).map_err(|err| SourceError::Malformed(err.to_string()))
}

fn mutation_name(mutation: &str) -> &str {
    let rest = mutation
        .trim_start()
        .trim_start_matches("mutation")
        .trim_start_matches(|c: char| c.is_whitespace() || c == '{');
    let end = rest
        .find(|c: char| !c.is_alphanumeric() && c != '_')
        .unwrap_or(rest.len());
    match &rest[..end] {
        "" => "mutation",
        name => name,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameStateData {
    game_state: WireGameState,
}

#[derive(Debug, Deserialize)]
struct PlayersData {
    #[serde(default)]
    players: Vec<WirePlayer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoundData {
    game_state: WireGameState,
    #[serde(default)]
    players: Vec<WirePlayer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGameState {
    #[serde(default)]
    current_bets: Vec<WireBet>,
    #[serde(default)]
    betting_end_time: Option<EpochMillis>,
    #[serde(default)]
    last_result: Option<WireResult>,
    #[serde(default)]
    history: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBet {
    player_chain_id: String,
    #[serde(default)]
    player_name: String,
    bet_type: BetKind,
    #[serde(default)]
    numbers: Vec<u8>,
    amount: Chips,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResult {
    #[serde(deserialize_with = "wheel_number")]
    number: u8,
    color: Color,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    winners: Vec<WireWinner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireWinner {
    player_chain_id: String,
    #[serde(default)]
    player_name: String,
    bet_type: BetKind,
    bet_amount: Chips,
    payout: Chips,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePlayer {
    chain_id: String,
    name: String,
    balance: Chips,
}

fn wheel_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let number = u8::deserialize(deserializer)?;
    if number > MAX_NUMBER {
        return Err(de::Error::custom(format!("{number} is not on the wheel")));
    }
    Ok(number)
}

impl From<WireGameState> for RoundSnapshot {
    fn from(state: WireGameState) -> Self {
        RoundSnapshot {
            current_bets: state
                .current_bets
                .into_iter()
                .map(|bet| Bet {
                    participant_id: bet.player_chain_id,
                    participant_name: bet.player_name,
                    bet_kind: bet.bet_type,
                    numbers: bet.numbers,
                    amount: bet.amount,
                })
                .collect(),
            betting_window_end_epoch_ms: state.betting_end_time,
            last_outcome: state.last_result.map(|result| Outcome {
                number: result.number,
                color: result.color,
                drawn_at: DrawTimestamp::new(result.timestamp),
                winners: result
                    .winners
                    .into_iter()
                    .map(|winner| Winner {
                        participant_id: winner.player_chain_id,
                        participant_name: winner.player_name,
                        bet_kind: winner.bet_type,
                        bet_amount: winner.bet_amount,
                        payout: winner.payout,
                    })
                    .collect(),
            }),
            history: state.history,
        }
    }
}

impl From<WirePlayer> for Participant {
    fn from(player: WirePlayer) -> Self {
        Participant {
            id: player.chain_id,
            display_name: player.name,
            balance: player.balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(node_url: &str) -> GraphQlSourceConfig {
        GraphQlSourceConfig {
            node_url: Url::parse(node_url).unwrap(),
            application_id: "app1".into(),
            chain_id: "mine".into(),
            host_chain_id: Some("host".into()),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn reads_go_to_the_host_chain_and_writes_to_our_own() {
        let config = config("http://localhost:8080");
        assert_eq!(
            config.query_url().unwrap().as_str(),
            "http://localhost:8080/chains/host/applications/app1"
        );
        assert_eq!(
            config.mutation_url().unwrap().as_str(),
            "http://localhost:8080/chains/mine/applications/app1"
        );
    }

    #[test]
    fn node_url_with_path_keeps_its_prefix() {
        let mut config = config("http://node.example/api/");
        config.host_chain_id = None;
        assert_eq!(
            config.query_url().unwrap().as_str(),
            "http://node.example/api/chains/mine/applications/app1"
        );
    }

    #[test]
    fn decodes_a_full_round() {
        let body = br#"{
          "data": {
            "gameState": {
              "isSpinning": false,
              "currentBets": [
                {"playerChainId": "b", "playerName": "Bea", "betType": "STRAIGHT", "numbers": [17], "amount": 50}
              ],
              "bettingEndTime": 1700000030000,
              "lastResult": {
                "number": 17, "color": "black", "timestamp": "1700000000000123",
                "winners": [{"playerChainId": "b", "playerName": "Bea", "betType": "STRAIGHT", "betAmount": 50, "payout": 1800}]
              },
              "history": [17, 4]
            },
            "players": [{"chainId": "b", "name": "Bea", "balance": 950}]
          }
        }"#;
        let data: RoundData = decode_response(body).unwrap();
        let snapshot: RoundSnapshot = data.game_state.into();
        assert_eq!(snapshot.stake_of("b"), 50);
        assert_eq!(snapshot.betting_window_end_epoch_ms, Some(1_700_000_030_000));
        let outcome = snapshot.last_outcome.unwrap();
        assert_eq!(outcome.drawn_at.as_str(), "1700000000000123");
        assert_eq!(outcome.payout_for("b"), 1_800);
        assert_eq!(snapshot.history, vec![17, 4]);
        let players: Vec<Participant> = data.players.into_iter().map(Into::into).collect();
        assert_eq!(players[0].display_name, "Bea");
    }

    #[test]
    fn first_graphql_error_is_surfaced() {
        let body = br#"{"data": null, "errors": [{"message": "insufficient balance"}, {"message": "other"}]}"#;
        let err = decode_response::<Value>(body).unwrap_err();
        assert!(matches!(err, SourceError::GraphQl(message) if message == "insufficient balance"));
    }

    #[test]
    fn wrong_shape_is_malformed_not_a_decode_failure() {
        let body = br#"{"data": {"gameState": {"lastResult": {"number": "seventeen"}}}}"#;
        let err = decode_response::<GameStateData>(body).unwrap_err();
        assert!(err.is_malformed());

        let err = decode_response::<GameStateData>(b"<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[test]
    fn outcome_off_the_wheel_is_malformed() {
        let body = br#"{"data": {"gameState": {
            "lastResult": {"number": 40, "color": "red", "timestamp": "1700000000000123"}
        }}}"#;
        let err = decode_response::<GameStateData>(body).unwrap_err();
        assert!(matches!(err, SourceError::Malformed(ref message) if message.contains("40")));
    }

    #[test]
    fn mutation_names_for_logs() {
        assert_eq!(mutation_name(START_ROUND), "startRound");
        assert_eq!(mutation_name(PLACE_BET), "PlaceBet");
    }
}
