use std::future::Future;

use redis::{aio::MultiplexedConnection, AsyncCommands, FromRedisValue, ToRedisArgs};
use redis_macros::{FromRedisValue, ToRedisArgs};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::CacheError;

const RECIPE_CACHE_BIND: &str = "recipe-cache-key";

// Caching - keys

#[derive(Serialize, Clone, Debug)]
pub struct CacheKey<T: ToString + Serialize> {
    _value: T,
    _type: CacheKeyType,
}

impl<T: ToString + Serialize> CacheKey<T> {
    pub fn from(r#type: CacheKeyType, key: T) -> Self {
        Self {
            _value: key,
            _type: r#type,
        }
    }

    pub fn lifetime(&self) -> CacheLifetime {
        match self._type {
            CacheKeyType::ShortLink => CacheLifetime::BindRecipeCache,
            CacheKeyType::Ingredients => CacheLifetime::Infinite,
        }
    }
}

impl<T: ToString + Serialize> std::fmt::Display for CacheKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self._type {
            CacheKeyType::ShortLink => write!(f, "short-link-{}", self._value.to_string()),
            CacheKeyType::Ingredients => write!(f, "ingredients-{}", self._value.to_string()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheKeyType {
    ShortLink,
    Ingredients,
}

impl CacheKeyType {
    pub fn new<T: ToString + Serialize>(self, key: T) -> CacheKey<T> {
        CacheKey::from(self, key)
    }
}

// Cache - wrappers

/// Values bound to the recipe cache are dropped whenever
/// [`invalidate_recipe_cache`] rotates the bind key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CacheLifetime {
    Infinite,
    BindRecipeCache,
}

impl CacheLifetime {
    pub async fn get_cache_bind(
        &self,
        cache: &mut MultiplexedConnection,
    ) -> Result<Option<String>, CacheError> {
        match self {
            CacheLifetime::Infinite => Ok(None),
            CacheLifetime::BindRecipeCache => {
                get_cache_value::<&str, String>(RECIPE_CACHE_BIND, cache).await
            }
        }
    }
}

#[derive(Serialize, Deserialize, FromRedisValue, ToRedisArgs, Clone, Debug)]
pub struct RedisValue<T: Serialize + DeserializeOwned + Send + Sync + Clone> {
    pub value: T,
    _lifetime: CacheLifetime,
    _bind: Option<String>,
}

impl<T> RedisValue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + Clone,
{
    async fn new(
        value: T,
        lifetime: CacheLifetime,
        cache: &mut MultiplexedConnection,
    ) -> Result<Self, CacheError> {
        let bind = lifetime.get_cache_bind(cache).await?;

        Ok(Self {
            value,
            _lifetime: lifetime,
            _bind: bind,
        })
    }

    async fn is_valid(&self, cache: &mut MultiplexedConnection) -> Result<bool, CacheError> {
        Ok(self._bind == self._lifetime.get_cache_bind(cache).await?)
    }

    /// Returns the cached value for `key`, or runs `callback` and caches what
    /// it returns. `None` results are not cached.
    pub async fn get_or_optional<K, F, Fut, E>(
        key: CacheKey<K>,
        cache: &mut MultiplexedConnection,
        callback: F,
    ) -> Result<Option<T>, E>
    where
        K: ToString + Serialize + Clone + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: From<CacheError>,
    {
        let k = key.to_string();
        let value = match get_cache_value::<&str, RedisValue<T>>(&k, cache).await {
            Ok(value) => value,
            Err(e) => {
                let mut c = cache.clone();
                let k = k.to_owned();
                tokio::spawn(async move {
                    log::error!("> Failed to read cached value {e:?}. Deleting {}", &k);
                    if let Err(e) = delete_cache_value(k, &mut c).await {
                        log::error!("> Failed to delete cached value! {e:?}");
                    }
                });
                None
            }
        };

        // * Cannot use .map(|| {...}) due to async closures
        let value = match value {
            Some(value) => {
                log::trace!("> Found {k}");
                match value.is_valid(cache).await? {
                    true => Some(value),
                    false => {
                        log::trace!("> Invalidated {k}");
                        None
                    }
                }
            }
            None => None,
        };

        if let Some(value) = value {
            return Ok(Some(value.value));
        }

        log::trace!("> Fetching {k}");
        match callback().await? {
            Some(value) => {
                let wrapped = RedisValue::new(value.clone(), key.lifetime(), cache).await?;

                if let Err(e) = set_cache_value(&k, wrapped, cache).await {
                    log::error!("{e:?}");
                }

                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

/// Rotates the bind key, every value bound to the recipe cache becomes stale.
pub async fn invalidate_recipe_cache(cache: &mut MultiplexedConnection) -> Result<(), CacheError> {
    let bind = uuid::Uuid::new_v4().to_string();
    log::trace!("> Rotating {RECIPE_CACHE_BIND} to {bind}");

    set_cache_value(RECIPE_CACHE_BIND, bind, cache).await
}

// Cache - raw handlers

pub async fn set_cache_value<K: ToRedisArgs + Send + Sync, V: ToRedisArgs + Send + Sync>(
    key: K,
    value: V,
    cache: &mut MultiplexedConnection,
) -> Result<(), CacheError> {
    let _: () = cache.set(key, value).await?;

    Ok(())
}

pub async fn delete_cache_value<K: ToRedisArgs + Send + Sync>(
    key: K,
    cache: &mut MultiplexedConnection,
) -> Result<(), CacheError> {
    let _: () = cache.del(key).await?;

    Ok(())
}

pub async fn get_cache_value<K: ToRedisArgs + Send + Sync, V: FromRedisValue>(
    key: K,
    cache: &mut MultiplexedConnection,
) -> Result<Option<V>, CacheError> {
    let value: Option<V> = cache.get(key).await?;

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed_by_type() {
        assert_eq!(
            CacheKeyType::ShortLink.new("aB3dE9").to_string(),
            "short-link-aB3dE9"
        );
        assert_eq!(
            CacheKeyType::Ingredients.new("sug").to_string(),
            "ingredients-sug"
        );
    }

    #[test]
    fn recipe_keys_follow_the_recipe_bind() {
        assert_eq!(
            CacheKeyType::ShortLink.new("aB3dE9").lifetime(),
            CacheLifetime::BindRecipeCache
        );
        assert_eq!(
            CacheKeyType::Ingredients.new("").lifetime(),
            CacheLifetime::Infinite
        );
    }
}
