use std::future::Future;

use rand::{distributions::Alphanumeric, Rng};
use sqlx::{Executor, Postgres};

use super::{error::ShortLinkError, schema::Uuid};
use crate::constants::{SHORT_LINK_LENGTH, SHORT_LINK_MAX_ATTEMPTS, SHORT_LINK_REDIRECT_PREFIX};

/// Outcome of claiming a token in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation<T> {
    Reserved(T),
    Taken,
}

/// Where short links are checked and claimed.
///
/// `reserve` must be atomic: a token another writer claimed first comes back
/// as [`Reservation::Taken`], never as an error.
pub trait ShortLinkStore {
    type Reserved;

    fn short_link_exists(
        &mut self,
        short_link: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    fn reserve(
        &mut self,
        short_link: &str,
    ) -> impl Future<Output = Result<Reservation<Self::Reserved>, sqlx::Error>> + Send;
}

pub async fn short_link_in_use<'e, E>(executor: E, short_link: &str) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM recipes WHERE short_link = $1")
        .bind(short_link)
        .fetch_optional(executor)
        .await?;

    Ok(row.is_some())
}

/// Draws alphanumeric tokens until the store accepts one.
///
/// Every drawn token counts against `max_attempts`, whether it was already
/// in use or lost the race to reserve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortLinkGenerator {
    length: usize,
    max_attempts: u32,
}

impl Default for ShortLinkGenerator {
    fn default() -> Self {
        Self::new(SHORT_LINK_LENGTH, SHORT_LINK_MAX_ATTEMPTS)
    }
}

impl ShortLinkGenerator {
    pub fn new(length: usize, max_attempts: u32) -> Self {
        Self {
            length,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn candidate<R: Rng>(&self, rng: &mut R) -> String {
        (0..self.length)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect()
    }

    pub async fn generate<S, R>(
        &self,
        store: &mut S,
        rng: &mut R,
    ) -> Result<S::Reserved, ShortLinkError>
    where
        S: ShortLinkStore,
        R: Rng,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = self.candidate(rng);

            if store.short_link_exists(&candidate).await? {
                log::debug!("Short link collision on attempt {attempt}: {candidate}");
                continue;
            }

            match store.reserve(&candidate).await? {
                Reservation::Reserved(reserved) => return Ok(reserved),
                Reservation::Taken => {
                    log::warn!("Short link {candidate} was taken before reserving (attempt {attempt})")
                }
            }
        }

        log::error!(
            "Failed to generate a unique short link in {} attempts",
            self.max_attempts
        );
        Err(ShortLinkError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

pub fn is_short_link(value: &str) -> bool {
    value.len() == SHORT_LINK_LENGTH && value.bytes().all(|b| b.is_ascii_alphanumeric())
}

pub fn short_link_redirect_path(recipe_id: Uuid) -> String {
    format!("{SHORT_LINK_REDIRECT_PREFIX}/{recipe_id}")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    /// Links in use, plus a number of reservations to lose before one
    /// succeeds.
    #[derive(Default)]
    struct MemoryStore {
        links: HashSet<String>,
        lost_reservations: u32,
        lookups: u32,
        reservations: u32,
    }

    impl MemoryStore {
        fn with_links<I: IntoIterator<Item = String>>(links: I) -> Self {
            Self {
                links: links.into_iter().collect(),
                ..Default::default()
            }
        }

        fn losing(lost_reservations: u32) -> Self {
            Self {
                lost_reservations,
                ..Default::default()
            }
        }
    }

    impl ShortLinkStore for MemoryStore {
        type Reserved = String;

        async fn short_link_exists(&mut self, short_link: &str) -> Result<bool, sqlx::Error> {
            self.lookups += 1;
            Ok(self.links.contains(short_link))
        }

        async fn reserve(&mut self, short_link: &str) -> Result<Reservation<String>, sqlx::Error> {
            self.reservations += 1;

            if self.lost_reservations > 0 {
                self.lost_reservations -= 1;
                return Ok(Reservation::Taken);
            }

            match self.links.insert(short_link.to_string()) {
                true => Ok(Reservation::Reserved(short_link.to_string())),
                false => Ok(Reservation::Taken),
            }
        }
    }

    #[derive(Default)]
    struct BrokenStore {
        fail_lookup: bool,
        reservations: u32,
    }

    impl ShortLinkStore for BrokenStore {
        type Reserved = String;

        async fn short_link_exists(&mut self, _short_link: &str) -> Result<bool, sqlx::Error> {
            match self.fail_lookup {
                true => Err(sqlx::Error::PoolTimedOut),
                false => Ok(false),
            }
        }

        async fn reserve(&mut self, _short_link: &str) -> Result<Reservation<String>, sqlx::Error> {
            self.reservations += 1;
            Err(sqlx::Error::PoolClosed)
        }
    }

    #[test]
    fn candidate_uses_alphanumeric_alphabet() {
        let generator = ShortLinkGenerator::default();
        let mut rng = StdRng::seed_from_u64(1);

        for _ in 0..100 {
            let candidate = generator.candidate(&mut rng);
            assert!(is_short_link(&candidate), "{candidate}");
        }
    }

    #[test]
    fn candidate_length_is_configurable() {
        let generator = ShortLinkGenerator::new(10, 5);
        let mut rng = StdRng::seed_from_u64(1);

        assert_eq!(generator.candidate(&mut rng).len(), 10);
        assert_eq!(generator.max_attempts(), 5);
    }

    #[tokio::test]
    async fn first_free_candidate_is_reserved() {
        let generator = ShortLinkGenerator::default();
        let mut store = MemoryStore::default();
        let expected = generator.candidate(&mut StdRng::seed_from_u64(42));

        let link = generator
            .generate(&mut store, &mut StdRng::seed_from_u64(42))
            .await
            .unwrap();

        assert_eq!(link, expected);
        assert_eq!(store.lookups, 1);
        assert_eq!(store.reservations, 1);
    }

    #[tokio::test]
    async fn retries_past_collisions() {
        let generator = ShortLinkGenerator::default();
        let mut preview = StdRng::seed_from_u64(7);
        let taken: Vec<String> = (0..5).map(|_| generator.candidate(&mut preview)).collect();
        let expected = generator.candidate(&mut preview);
        let mut store = MemoryStore::with_links(taken.clone());

        let link = generator
            .generate(&mut store, &mut StdRng::seed_from_u64(7))
            .await
            .unwrap();

        assert_eq!(link, expected);
        assert!(!taken.contains(&link));
        assert_eq!(store.lookups, 6);
        assert_eq!(store.reservations, 1);
    }

    #[tokio::test]
    async fn lost_reservation_draws_a_new_token() {
        let generator = ShortLinkGenerator::default();
        let mut preview = StdRng::seed_from_u64(5);
        let lost: Vec<String> = (0..2).map(|_| generator.candidate(&mut preview)).collect();
        let expected = generator.candidate(&mut preview);
        let mut store = MemoryStore::losing(2);

        let link = generator
            .generate(&mut store, &mut StdRng::seed_from_u64(5))
            .await
            .unwrap();

        assert_eq!(link, expected);
        assert!(!lost.contains(&link));
        assert_eq!(store.reservations, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let generator = ShortLinkGenerator::new(SHORT_LINK_LENGTH, 3);
        let mut preview = StdRng::seed_from_u64(9);
        let taken: Vec<String> = (0..3).map(|_| generator.candidate(&mut preview)).collect();
        let mut store = MemoryStore::with_links(taken);

        let result = generator
            .generate(&mut store, &mut StdRng::seed_from_u64(9))
            .await;

        assert!(matches!(
            result,
            Err(ShortLinkError::Exhausted { attempts: 3 })
        ));
        assert_eq!(store.lookups, 3);
        assert_eq!(store.reservations, 0);
    }

    #[tokio::test]
    async fn lost_reservations_share_the_attempt_budget() {
        let generator = ShortLinkGenerator::new(SHORT_LINK_LENGTH, 5);
        let mut store = MemoryStore::losing(u32::MAX);

        let result = generator
            .generate(&mut store, &mut StdRng::seed_from_u64(13))
            .await;

        assert!(matches!(
            result,
            Err(ShortLinkError::Exhausted { attempts: 5 })
        ));
        assert_eq!(store.lookups, 5);
        assert_eq!(store.reservations, 5);
    }

    #[tokio::test]
    async fn collisions_and_lost_reservations_count_together() {
        let generator = ShortLinkGenerator::new(SHORT_LINK_LENGTH, 2);
        let first = generator.candidate(&mut StdRng::seed_from_u64(21));
        let mut store = MemoryStore {
            links: HashSet::from([first]),
            lost_reservations: 1,
            ..Default::default()
        };

        let result = generator
            .generate(&mut store, &mut StdRng::seed_from_u64(21))
            .await;

        assert!(matches!(
            result,
            Err(ShortLinkError::Exhausted { attempts: 2 })
        ));
        assert_eq!(store.lookups, 2);
        assert_eq!(store.reservations, 1);
    }

    #[tokio::test]
    async fn store_errors_are_not_retried() {
        let generator = ShortLinkGenerator::default();
        let mut rng = StdRng::seed_from_u64(3);

        let mut lookup = BrokenStore {
            fail_lookup: true,
            ..Default::default()
        };
        let result = generator.generate(&mut lookup, &mut rng).await;
        assert!(matches!(
            result,
            Err(ShortLinkError::Store(sqlx::Error::PoolTimedOut))
        ));
        assert_eq!(lookup.reservations, 0);

        let mut reserve = BrokenStore::default();
        let result = generator.generate(&mut reserve, &mut rng).await;
        assert!(matches!(
            result,
            Err(ShortLinkError::Store(sqlx::Error::PoolClosed))
        ));
        assert_eq!(reserve.reservations, 1);
    }

    #[tokio::test]
    async fn generated_links_never_repeat() {
        let generator = ShortLinkGenerator::new(2, 100);
        let mut store = MemoryStore::default();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..200 {
            generator.generate(&mut store, &mut rng).await.unwrap();
        }

        assert_eq!(store.links.len(), 200);
    }

    #[test]
    fn redirect_points_at_recipe_page() {
        assert_eq!(short_link_redirect_path(17), "/recipes/17");
    }
}
