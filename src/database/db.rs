use super::{
    db_structs::{ConfigSummary, RawConfig, RawMatch, RawSeat},
    CacheStore, MatchRepository, RepositoryError
};
use crate::{
    config::window_bounds,
    model::structures::{
        match_result::MatchResultRecord, participant_rating::ParticipantRatingState, seat::Seat,
        snapshot::CacheSnapshot
    }
};
use chrono::NaiveDate;
use futures::future::try_join_all;
use indexmap::IndexMap;
use itertools::Itertools;
use postgres_types::ToSql;
use std::{str::FromStr, sync::Arc};
use tokio::sync::Mutex;
use tokio_postgres::{Client, IsolationLevel, NoTls, Row, Transaction};
use tracing::{debug, error, info};

const SCHEMA: &str = include_str!("schema.sql");

/// Rows per multi-row INSERT. Keeps the bind parameter count well below the
/// Postgres limit of 65535.
const INSERT_CHUNK_ROWS: usize = 1000;

#[derive(Clone)]
pub struct DbClient {
    client: Arc<Client>,
    /// Separate connection for snapshot transactions, which need exclusive use of it
    writer: Arc<Mutex<Client>>
}

impl DbClient {
    // Connect to the database and return a DbClient instance
    pub async fn connect(connection_str: &str) -> Result<Self, RepositoryError> {
        let client = Self::open(connection_str).await?;
        let writer = Self::open(connection_str).await?;

        Ok(DbClient {
            client: Arc::new(client),
            writer: Arc::new(Mutex::new(writer))
        })
    }

    async fn open(connection_str: &str) -> Result<Client, RepositoryError> {
        let (client, connection) = tokio_postgres::connect(connection_str, NoTls).await?;

        // Spawn the connection object to run in the background
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("connection error: {}", e);
            }
        });

        Ok(client)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Creates any missing tables.
    pub async fn create_schema(&self) -> Result<(), RepositoryError> {
        self.client.batch_execute(SCHEMA).await?;
        Ok(())
    }

    /// Stores a configuration under its `config_hash`.
    ///
    /// Storing the same rules again updates the name, description and official
    /// flag. Different rules under an existing hash are refused.
    pub async fn insert_config(&self, config: &RawConfig, is_official: bool) -> Result<(), RepositoryError> {
        let query = "INSERT INTO rating_configurations (config_hash, name, description, config_data, is_official) \
            VALUES ($1, $2, $3, $4, $5) \
            ON CONFLICT (config_hash) DO UPDATE SET name = $2, description = $3, is_official = $5 \
            WHERE rating_configurations.config_data = EXCLUDED.config_data";
        let config_data = config.config_data.to_string();
        let values: &[&(dyn ToSql + Sync)] = &[
            &config.config_hash,
            &config.name,
            &config.description,
            &config_data,
            &is_official
        ];

        if self.client.execute(query, values).await? == 0 {
            return Err(RepositoryError::ConfigConflict(config.config_hash.clone()));
        }

        Ok(())
    }

    /// Inserts matches and their seats into the match log.
    pub async fn insert_matches(&self, matches: &[RawMatch]) -> Result<(), RepositoryError> {
        for m in matches {
            let values: &[&(dyn ToSql + Sync)] = &[&m.match_id, &m.started_at, &m.finished_at, &m.status];
            self.client
                .execute(
                    "INSERT INTO games (id, started_at, finished_at, status) VALUES ($1, $2, $3, $4)",
                    values
                )
                .await?;

            for seat in &m.seats {
                let values: &[&(dyn ToSql + Sync)] =
                    &[&m.match_id, &seat.seat, &seat.participant_id, &seat.final_score];
                self.client
                    .execute(
                        "INSERT INTO game_seats (game_id, seat, player_id, final_score) VALUES ($1, $2, $3, $4)",
                        values
                    )
                    .await?;
            }
        }

        Ok(())
    }

    fn config_from_row(row: &Row) -> Result<RawConfig, RepositoryError> {
        let config_hash: String = row.try_get("config_hash")?;
        let config_data: String = row.try_get("config_data")?;
        let config_data = serde_json::from_str(&config_data).map_err(|e| RepositoryError::Decode {
            what: format!("config_data of configuration {}", config_hash),
            reason: e.to_string()
        })?;

        Ok(RawConfig {
            config_hash,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            config_data
        })
    }

    fn rating_from_row(row: &Row) -> Result<ParticipantRatingState, RepositoryError> {
        let games_played: i64 = row.try_get("games_played")?;

        Ok(ParticipantRatingState {
            participant_id: row.try_get("player_id")?,
            mean: row.try_get("mu")?,
            uncertainty: row.try_get("sigma")?,
            display_rating: row.try_get("display_rating")?,
            matches_played: u32::try_from(games_played).map_err(|e| RepositoryError::Decode {
                what: "games_played".to_string(),
                reason: e.to_string()
            })?,
            total_margin: row.try_get("total_plus_minus")?,
            best_margin: row.try_get("best_game_plus")?,
            worst_margin: row.try_get("worst_game_minus")?,
            last_match_at: row.try_get("last_game_at")?
        })
    }

    fn result_from_row(row: &Row) -> Result<MatchResultRecord, RepositoryError> {
        let seat: String = row.try_get("seat")?;
        let placement: i16 = row.try_get("placement")?;

        Ok(MatchResultRecord {
            match_id: row.try_get("game_id")?,
            participant_id: row.try_get("player_id")?,
            seat: Seat::from_str(&seat).map_err(|e| RepositoryError::Decode {
                what: format!("seat '{}'", seat),
                reason: e.to_string()
            })?,
            started_at: row.try_get("started_at")?,
            final_score: row.try_get("final_score")?,
            placement: u8::try_from(placement).map_err(|e| RepositoryError::Decode {
                what: "placement".to_string(),
                reason: e.to_string()
            })?,
            plus_minus: row.try_get("plus_minus")?,
            rating_weight: row.try_get("rating_weight")?,
            mean_before: row.try_get("mu_before")?,
            uncertainty_before: row.try_get("sigma_before")?,
            mean_after: row.try_get("mu_after")?,
            uncertainty_after: row.try_get("sigma_after")?
        })
    }

    /// Holds the per-key lock until `tx` ends, serializing snapshot writers across processes.
    async fn lock_key(tx: &Transaction<'_>, config_hash: &str) -> Result<(), RepositoryError> {
        tx.execute("SELECT pg_advisory_xact_lock(hashtext($1))", &[&config_hash])
            .await?;
        Ok(())
    }

    async fn delete_snapshot(tx: &Transaction<'_>, config_hash: &str) -> Result<(), RepositoryError> {
        // Header first, so a reader never sees a header over missing rows
        tx.execute("DELETE FROM cached_materializations WHERE config_hash = $1", &[&config_hash])
            .await?;

        try_join_all([
            tx.execute("DELETE FROM cached_player_ratings WHERE config_hash = $1", &[&config_hash]),
            tx.execute("DELETE FROM cached_game_results WHERE config_hash = $1", &[&config_hash])
        ])
        .await?;

        Ok(())
    }

    async fn save_ratings(
        tx: &Transaction<'_>,
        config_hash: &str,
        ratings: &[ParticipantRatingState]
    ) -> Result<(), RepositoryError> {
        const COLUMNS: usize = 11;
        let base_query = "INSERT INTO cached_player_ratings (config_hash, player_id, rank, mu, sigma, display_rating, \
            games_played, total_plus_minus, best_game_plus, worst_game_minus, last_game_at) VALUES ";

        // Owned integer columns, bound by reference below
        let ranks_and_games: Vec<(i64, i64)> = ratings
            .iter()
            .enumerate()
            .map(|(i, r)| (i as i64 + 1, i64::from(r.matches_played)))
            .collect();

        let chunks: Vec<(String, Vec<&(dyn ToSql + Sync)>)> = ratings
            .iter()
            .zip(ranks_and_games.iter())
            .chunks(INSERT_CHUNK_ROWS)
            .into_iter()
            .map(|chunk| {
                let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
                let mut rows = 0;
                for (rating, (rank, games_played)) in chunk {
                    params.extend_from_slice(&[
                        &config_hash as &(dyn ToSql + Sync),
                        &rating.participant_id,
                        rank,
                        &rating.mean,
                        &rating.uncertainty,
                        &rating.display_rating,
                        games_played,
                        &rating.total_margin,
                        &rating.best_margin,
                        &rating.worst_margin,
                        &rating.last_match_at
                    ]);
                    rows += 1;
                }

                (format!("{}{}", base_query, values_clause(rows, COLUMNS)), params)
            })
            .collect();

        try_join_all(chunks.iter().map(|(query, params)| tx.execute(query.as_str(), params.as_slice()))).await?;

        Ok(())
    }

    async fn save_results(
        tx: &Transaction<'_>,
        config_hash: &str,
        results: &[MatchResultRecord]
    ) -> Result<(), RepositoryError> {
        const COLUMNS: usize = 14;
        let base_query = "INSERT INTO cached_game_results (config_hash, seq, game_id, player_id, seat, started_at, \
            final_score, placement, plus_minus, rating_weight, mu_before, sigma_before, mu_after, sigma_after) VALUES ";

        let owned: Vec<(i64, &'static str, i16)> = results
            .iter()
            .enumerate()
            .map(|(i, r)| (i as i64, r.seat.as_str(), i16::from(r.placement)))
            .collect();

        let chunks: Vec<(String, Vec<&(dyn ToSql + Sync)>)> = results
            .iter()
            .zip(owned.iter())
            .chunks(INSERT_CHUNK_ROWS)
            .into_iter()
            .map(|chunk| {
                let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
                let mut rows = 0;
                for (result, (seq, seat, placement)) in chunk {
                    params.extend_from_slice(&[
                        &config_hash as &(dyn ToSql + Sync),
                        seq,
                        &result.match_id,
                        &result.participant_id,
                        seat,
                        &result.started_at,
                        &result.final_score,
                        placement,
                        &result.plus_minus,
                        &result.rating_weight,
                        &result.mean_before,
                        &result.uncertainty_before,
                        &result.mean_after,
                        &result.uncertainty_after
                    ]);
                    rows += 1;
                }

                (format!("{}{}", base_query, values_clause(rows, COLUMNS)), params)
            })
            .collect();

        try_join_all(chunks.iter().map(|(query, params)| tx.execute(query.as_str(), params.as_slice()))).await?;

        Ok(())
    }
}

/// `($1, $2), ($3, $4)` for two rows of two columns.
fn values_clause(rows: usize, columns: usize) -> String {
    (0..rows)
        .map(|row| {
            let placeholders = (1..=columns).map(|col| format!("${}", row * columns + col)).join(", ");
            format!("({})", placeholders)
        })
        .join(", ")
}

impl MatchRepository for DbClient {
    async fn get_config(&self, config_hash: &str) -> Result<Option<RawConfig>, RepositoryError> {
        let row = self
            .client
            .query_opt(
                "SELECT config_hash, name, description, config_data FROM rating_configurations WHERE config_hash = $1",
                &[&config_hash]
            )
            .await?;

        row.as_ref().map(Self::config_from_row).transpose()
    }

    async fn list_matches(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RawMatch>, RepositoryError> {
        let (lower, upper) = window_bounds(start, end);

        info!("Fetching matches from {} to {}...", start, end);
        let rows = self
            .client
            .query(
                "SELECT g.id, g.started_at, g.finished_at, g.status, s.seat, s.player_id, s.final_score
                FROM games g
                    LEFT JOIN game_seats s ON s.game_id = g.id
                WHERE g.started_at >= $1 AND g.started_at < $2
                ORDER BY g.started_at, g.id",
                &[&lower, &upper]
            )
            .await?;

        let mut matches: IndexMap<String, RawMatch> = IndexMap::new();
        for row in rows {
            let match_id: String = row.try_get("id")?;

            if !matches.contains_key(&match_id) {
                matches.insert(
                    match_id.clone(),
                    RawMatch {
                        match_id: match_id.clone(),
                        started_at: row.try_get("started_at")?,
                        finished_at: row.try_get("finished_at")?,
                        status: row.try_get("status")?,
                        seats: Vec::new()
                    }
                );
            }

            // A game without seats still yields one row from the outer join
            let seat: Option<String> = row.try_get("seat")?;
            if let (Some(seat), Some(m)) = (seat, matches.get_mut(&match_id)) {
                m.seats.push(RawSeat {
                    seat,
                    participant_id: row.try_get("player_id")?,
                    final_score: row.try_get("final_score")?
                });
            }
        }

        info!("{} matches fetched", matches.len());
        Ok(matches.into_values().collect())
    }

    async fn list_configs(&self) -> Result<Vec<ConfigSummary>, RepositoryError> {
        let rows = self
            .client
            .query(
                "SELECT config_hash, name, description, is_official FROM rating_configurations ORDER BY created_at, config_hash",
                &[]
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ConfigSummary {
                    config_hash: row.try_get("config_hash")?,
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                    is_official: row.try_get("is_official")?
                })
            })
            .collect()
    }
}

impl CacheStore for DbClient {
    async fn read_source_hash(&self, config_hash: &str) -> Result<Option<String>, RepositoryError> {
        let row = self
            .client
            .query_opt(
                "SELECT source_data_hash FROM cached_materializations WHERE config_hash = $1",
                &[&config_hash]
            )
            .await?;

        Ok(row.map(|r| r.try_get("source_data_hash")).transpose()?)
    }

    async fn clear(&self, config_hash: &str) -> Result<(), RepositoryError> {
        let mut writer = self.writer.lock().await;
        let tx = writer.transaction().await?;

        Self::lock_key(&tx, config_hash).await?;
        Self::delete_snapshot(&tx, config_hash).await?;
        tx.commit().await?;

        debug!("Cleared cached rows for {}", config_hash);
        Ok(())
    }

    async fn write(&self, snapshot: &CacheSnapshot) -> Result<(), RepositoryError> {
        let config_hash = snapshot.config_hash.as_str();
        let mut writer = self.writer.lock().await;
        let tx = writer.transaction().await?;

        Self::lock_key(&tx, config_hash).await?;
        // Another run may have stored a snapshot since this one cleared
        Self::delete_snapshot(&tx, config_hash).await?;

        Self::save_ratings(&tx, config_hash, &snapshot.ratings).await?;
        Self::save_results(&tx, config_hash, &snapshot.results).await?;

        let player_count = snapshot.ratings.len() as i64;
        let game_count = snapshot.results.iter().map(|r| r.match_id.as_str()).unique().count() as i64;
        let values: &[&(dyn ToSql + Sync)] = &[
            &config_hash,
            &snapshot.window_start,
            &snapshot.window_end,
            &snapshot.source_data_hash,
            &player_count,
            &game_count,
            &snapshot.computed_at
        ];

        // The header row is the commit marker
        tx.execute(
            "INSERT INTO cached_materializations (config_hash, window_start, window_end, source_data_hash, \
            player_count, game_count, computed_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            values
        )
        .await?;

        tx.commit().await?;
        info!(
            "{} player ratings and {} game results saved",
            snapshot.ratings.len(),
            snapshot.results.len()
        );

        Ok(())
    }

    async fn read_snapshot(&self, config_hash: &str) -> Result<Option<CacheSnapshot>, RepositoryError> {
        let mut reader = self.writer.lock().await;
        // Header and rows from one consistent view
        let tx = reader
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()
            .await?;

        let Some(header) = tx
            .query_opt(
                "SELECT window_start, window_end, source_data_hash, computed_at \
                FROM cached_materializations WHERE config_hash = $1",
                &[&config_hash]
            )
            .await?
        else {
            return Ok(None);
        };

        let params: [&(dyn ToSql + Sync); 1] = [&config_hash];
        let (rating_rows, result_rows) = futures::try_join!(
            tx.query(
                "SELECT * FROM cached_player_ratings WHERE config_hash = $1 ORDER BY rank",
                &params
            ),
            tx.query(
                "SELECT * FROM cached_game_results WHERE config_hash = $1 ORDER BY seq",
                &params
            )
        )?;
        tx.commit().await?;

        Ok(Some(CacheSnapshot {
            config_hash: config_hash.to_string(),
            window_start: header.try_get("window_start")?,
            window_end: header.try_get("window_end")?,
            ratings: rating_rows
                .iter()
                .map(Self::rating_from_row)
                .collect::<Result<_, _>>()?,
            results: result_rows
                .iter()
                .map(Self::result_from_row)
                .collect::<Result<_, _>>()?,
            source_data_hash: header.try_get("source_data_hash")?,
            computed_at: header.try_get("computed_at")?
        }))
    }
}
