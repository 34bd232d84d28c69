//! [`NanoEventsFactory`]: entry point from a column source to events.

use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::behavior::Behavior;
use crate::cache::{CacheConfig, ColumnCache};
use crate::error::{NanoEventsError, Result};
use crate::events::NanoEvents;
use crate::form::Form;
use crate::mapping::KeyMapping;
use crate::schemas::{NanoAODSchema, Schema, base_form, schema_from_name};
use crate::source::{ColumnSource, PreloadedSource};

/// Shared record of every branch loaded from the source, in load order.
pub type AccessLog = Arc<Mutex<Vec<String>>>;

/// Options for building a [`NanoEventsFactory`].
#[derive(Clone)]
pub struct FactoryOptions {
    /// First entry (default 0, clamped to the entry count).
    pub entry_start: Option<u64>,
    /// Stop entry, exclusive (default: entry count, clamped).
    pub entry_stop: Option<u64>,
    /// Schema interpreting the branches. Default: [`NanoAODSchema`].
    pub schema: Arc<dyn Schema>,
    /// Arbitrary user metadata exposed on the events.
    pub metadata: Map<String, Value>,
    /// Runtime cache configuration (ignored when `shared_cache` is set).
    pub cache: CacheConfig,
    /// Cache shared with other factories.
    pub shared_cache: Option<Arc<ColumnCache>>,
    /// Record of loaded branches.
    pub access_log: Option<AccessLog>,
}

impl std::fmt::Debug for FactoryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryOptions")
            .field("entry_start", &self.entry_start)
            .field("entry_stop", &self.entry_stop)
            .field("schema", &self.schema.name())
            .field("metadata", &self.metadata)
            .field("cache", &self.cache)
            .field("shared_cache", &self.shared_cache.is_some())
            .field("access_log", &self.access_log.is_some())
            .finish()
    }
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            entry_start: None,
            entry_stop: None,
            schema: Arc::new(NanoAODSchema::default()),
            metadata: Map::new(),
            cache: CacheConfig::default(),
            shared_cache: None,
            access_log: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OptionsDoc {
    entry_start: Option<u64>,
    entry_stop: Option<u64>,
    schema: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
    cache_max_bytes: Option<usize>,
    cache_enabled: Option<bool>,
    warn_missing_crossrefs: Option<bool>,
    error_missing_event_ids: Option<bool>,
}

impl FactoryOptions {
    /// Default options: whole source, NanoAOD schema, fresh cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// First entry to read.
    pub fn entry_start(mut self, start: u64) -> Self {
        self.entry_start = Some(start);
        self
    }

    /// Stop entry (exclusive).
    pub fn entry_stop(mut self, stop: u64) -> Self {
        self.entry_stop = Some(stop);
        self
    }

    /// Schema interpreting the branches.
    pub fn schema(mut self, schema: impl Schema + 'static) -> Self {
        self.schema = Arc::new(schema);
        self
    }

    /// Like [`schema`](Self::schema), for an already shared schema.
    pub fn schema_arc(mut self, schema: Arc<dyn Schema>) -> Self {
        self.schema = schema;
        self
    }

    /// User metadata exposed on the events.
    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Runtime cache configuration.
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Reuse a cache owned by other factories.
    pub fn shared_cache(mut self, cache: Arc<ColumnCache>) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    /// Record every loaded branch in `log`.
    pub fn access_log(mut self, log: AccessLog) -> Self {
        self.access_log = Some(log);
        self
    }

    /// Parse options from a JSON document.
    ///
    /// ```json
    /// {"schema": "nanoaod", "entry_start": 0, "entry_stop": 1000,
    ///  "metadata": {"dataset": "DY"}, "cache_max_bytes": 67108864}
    /// ```
    ///
    /// `warn_missing_crossrefs` / `error_missing_event_ids` configure the
    /// NanoAOD-based schemas and are rejected for the others.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: OptionsDoc = serde_json::from_str(json)?;
        let schema_name = doc.schema.as_deref().unwrap_or("nanoaod").to_ascii_lowercase();
        let nano_flags = doc.warn_missing_crossrefs.is_some() || doc.error_missing_event_ids.is_some();
        let schema: Arc<dyn Schema> = match schema_name.as_str() {
            "nanoaod" | "pfnanoaod" => {
                let mut nano = NanoAODSchema::default();
                if let Some(w) = doc.warn_missing_crossrefs {
                    nano = nano.warn_missing_crossrefs(w);
                }
                if let Some(e) = doc.error_missing_event_ids {
                    nano = nano.error_missing_event_ids(e);
                }
                if schema_name == "nanoaod" {
                    Arc::new(nano)
                } else {
                    Arc::new(crate::schemas::PFNanoAODSchema::new(nano))
                }
            }
            _ if nano_flags => {
                return Err(NanoEventsError::Validation(format!(
                    "NanoAOD options given for schema '{schema_name}'"
                )));
            }
            other => schema_from_name(other)?,
        };

        let mut cache = CacheConfig::default();
        if let Some(max) = doc.cache_max_bytes {
            cache = cache.max_bytes(max);
        }
        if doc.cache_enabled == Some(false) {
            cache = CacheConfig::disabled();
        }

        Ok(Self {
            entry_start: doc.entry_start,
            entry_stop: doc.entry_stop,
            schema,
            metadata: doc.metadata,
            cache,
            shared_cache: None,
            access_log: None,
        })
    }
}

/// Builds [`NanoEvents`] for one partition of a column source.
///
/// The schema form is built once at construction; every call to
/// [`events`](Self::events) shares it, together with the runtime cache.
pub struct NanoEventsFactory {
    source: Arc<dyn ColumnSource>,
    schema: Arc<dyn Schema>,
    form: Arc<Form>,
    behavior: Arc<Behavior>,
    metadata: Arc<Map<String, Value>>,
    mapping: Arc<KeyMapping>,
    cache: Arc<ColumnCache>,
    entry_start: u64,
    entry_stop: u64,
    partition_key: String,
}

impl std::fmt::Debug for NanoEventsFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NanoEventsFactory")
            .field("partition_key", &self.partition_key)
            .field("schema", &self.schema.name())
            .finish()
    }
}

impl NanoEventsFactory {
    /// Events from in-memory columns.
    pub fn from_preloaded(source: PreloadedSource, options: FactoryOptions) -> Result<Self> {
        Self::from_source(Arc::new(source), options)
    }

    /// Events from a Parquet file.
    #[cfg(feature = "parquet-io")]
    pub fn from_parquet(path: impl AsRef<std::path::Path>, options: FactoryOptions) -> Result<Self> {
        let source = crate::source::ParquetSource::open(path)?;
        Self::from_source(Arc::new(source), options)
    }

    /// Events from Parquet bytes held in memory.
    #[cfg(feature = "parquet-io")]
    pub fn from_parquet_bytes(
        bytes: impl Into<bytes::Bytes>,
        options: FactoryOptions,
    ) -> Result<Self> {
        let source = crate::source::ParquetSource::from_bytes(bytes)?;
        Self::from_source(Arc::new(source), options)
    }

    /// Events from any column source.
    pub fn from_source(source: Arc<dyn ColumnSource>, options: FactoryOptions) -> Result<Self> {
        let entries = source.num_entries();
        let entry_start = options.entry_start.unwrap_or(0).min(entries);
        let entry_stop = options.entry_stop.unwrap_or(entries).min(entries);
        if entry_start > entry_stop {
            return Err(NanoEventsError::EntryRange { start: entry_start, stop: entry_stop, entries });
        }
        let partition_key = format!(
            "{}/{}/{}-{}",
            source.uuid(),
            source.object_path().trim_matches('/'),
            entry_start,
            entry_stop
        );

        let base = base_form(&source.branches())?;
        let form = Arc::new(options.schema.build(&base)?);
        log::debug!(
            "built {} form for {partition_key}: {} top-level fields",
            options.schema.name(),
            form.fields().len()
        );

        let cache = options
            .shared_cache
            .unwrap_or_else(|| Arc::new(ColumnCache::new(options.cache)));
        let mapping = Arc::new(KeyMapping::new(
            Arc::clone(&source),
            entry_start,
            entry_stop,
            partition_key.clone(),
            Arc::clone(&cache),
            options.access_log,
        ));

        Ok(Self {
            source,
            behavior: Arc::new(options.schema.behavior()),
            schema: options.schema,
            form,
            metadata: Arc::new(options.metadata),
            mapping,
            cache,
            entry_start,
            entry_stop,
            partition_key,
        })
    }

    /// `"{uuid}/{object_path}/{start}-{stop}"`; prefixes every cache key.
    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    /// Entry range `[start, stop)` after clamping.
    pub fn entry_range(&self) -> (u64, u64) {
        (self.entry_start, self.entry_stop)
    }

    /// Schema form of the source.
    pub fn form(&self) -> &Form {
        &self.form
    }

    /// Schema the factory was built with.
    pub fn schema(&self) -> &dyn Schema {
        self.schema.as_ref()
    }

    /// Underlying column source.
    pub fn source(&self) -> &dyn ColumnSource {
        self.source.as_ref()
    }

    /// Runtime cache shared by every events view of this factory.
    pub fn cache(&self) -> &Arc<ColumnCache> {
        &self.cache
    }

    /// The events view. Nothing is read until a field is materialized.
    pub fn events(&self) -> NanoEvents {
        NanoEvents::new(
            Arc::clone(&self.form),
            Arc::clone(&self.mapping),
            Arc::clone(&self.behavior),
            Arc::clone(&self.metadata),
        )
    }
}
