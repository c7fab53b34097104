//! Orchestration of one primary grid and its remote dependencies.
//!
//! A [`CompositeGrid`] walks a fixed sequence of phases, never re-entering
//! one: `Init -> SecondaryResolution -> PrimaryFetch -> Merge -> ConfigMerge
//! -> Format`. Every remote constraint is resolved before the primary
//! predicate is rendered, and resolution fails closed: a remote error or an
//! unsatisfiable remote constraint rejects the request instead of silently
//! querying a wider collection.

use std::collections::{BTreeMap, HashSet};

use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{ApiGrid, CallShape, SecondaryResult, merge_rows};
use crate::config::{GridDefinition, PublicField};
use crate::error::{GridError, Messages, Result, merge_messages};
use crate::grid::{CollectionGrid, GridResult};
use crate::output::{OutputEnvelope, OutputFormatter};
use crate::query::QueryInput;
use crate::remote::RemoteCaller;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Init,
    SecondaryResolution,
    PrimaryFetch,
    Merge,
    ConfigMerge,
    Format,
    Done,
}

pub struct CompositeGrid<'a, S: Store, C: RemoteCaller> {
    phase: Phase,
    input: QueryInput,
    primary: CollectionGrid<'a, S>,
    apis: Vec<ApiGrid<'a, C>>,
    output: &'a OutputFormatter,
}

impl<'a, S: Store, C: RemoteCaller> CompositeGrid<'a, S, C> {
    /// Validates the top-level input and builds the primary grid plus one
    /// [`ApiGrid`] per remote dependency. Fields owned by a remote are taken
    /// out of the primary grid's input.
    pub fn new(
        definition: &'a GridDefinition,
        store: &'a S,
        caller: &'a C,
        header: &'a Value,
        output: &'a OutputFormatter,
        input: &Value,
    ) -> Result<Self> {
        let input = QueryInput::from_value(input)?;
        let remote_fields: HashSet<&str> = definition
            .apis
            .iter()
            .flat_map(|api| api.input_parameters.keys().map(String::as_str))
            .collect();
        let mut primary = CollectionGrid::from_input(
            store,
            &definition.collection,
            &definition.fields,
            input.without_fields(&remote_fields),
        );
        let mut apis = Vec::with_capacity(definition.apis.len());
        for api in &definition.apis {
            primary.require_column(&api.primary_key);
            apis.push(ApiGrid::new(api, caller, &input, header)?);
        }
        Ok(Self { phase: Phase::Init, input, primary, apis, output })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self, next: Phase) {
        debug!(from = ?self.phase, to = ?next, "composite phase");
        self.phase = next;
    }

    /// Validation messages of the primary grid and every remote, combined.
    pub fn messages(&self) -> Messages {
        let mut messages = self.primary.messages().clone();
        for api in &self.apis {
            merge_messages(&mut messages, api.messages().clone());
        }
        messages
    }

    /// Union of every component's field capabilities.
    pub fn configuration(&self) -> BTreeMap<String, PublicField> {
        let mut configuration = self.primary.formatter().fields().public_config();
        for api in &self.apis {
            for (name, field) in api.fields().public_config() {
                configuration.entry(name).or_insert(field);
            }
        }
        configuration
    }

    pub async fn fetch(&mut self) -> Result<OutputEnvelope> {
        if self.phase != Phase::Init {
            return Err(GridError::Phase(format!("composite grid already ran to {:?}", self.phase)));
        }
        let messages = self.messages();
        if !messages.is_empty() {
            self.phase = Phase::Done;
            warn!(fields = messages.len(), "composite fetch rejected");
            return Err(GridError::Validation(messages));
        }

        if !self.apis.is_empty() {
            self.advance(Phase::SecondaryResolution);
            if let Err(error) = self.resolve_secondaries().await {
                self.phase = Phase::Done;
                return Err(error);
            }
        }

        self.advance(Phase::PrimaryFetch);
        let GridResult { mut rows, pagination } = match self.primary.fetch().await {
            Ok(result) => result,
            Err(error) => {
                self.phase = Phase::Done;
                return Err(error);
            }
        };

        self.advance(Phase::Merge);
        let merges = join_all(self.apis.iter().map(|api| api.get_merge_data(&rows))).await;
        for (api, merge) in self.apis.iter().zip(merges) {
            match merge {
                Ok(data) => merge_rows(&mut rows, &api.api().primary_key, &data),
                // the result set is fixed by now; a failed enrichment only leaves fields out
                Err(error) => warn!(%error, "merge data unavailable"),
            }
        }

        self.advance(Phase::ConfigMerge);
        let configuration = self.configuration();

        self.advance(Phase::Format);
        let mut projection = self.primary.projection();
        for api in &self.apis {
            projection.extend(&api.fields().projection());
        }
        let envelope = self.output.format_output(
            &self.input,
            configuration,
            rows,
            pagination,
            Some(&projection),
            Some(self.primary.config()),
        );
        self.advance(Phase::Done);
        Ok(envelope)
    }

    // An erroring remote rejects with its error. An exact constraint that
    // resolved to no keys cannot be satisfied by any row. Free-text misses only
    // drop an alternative, unless no remote part produced anything at all.
    async fn resolve_secondaries(&mut self) -> Result<()> {
        let applicable = self.apis.iter().filter(|api| api.is_applicable()).count();
        let outcomes = join_all(self.apis.iter_mut().map(|api| api.fetch())).await;
        let mut contributions = Vec::new();
        for (api, outcome) in self.apis.iter().zip(outcomes) {
            let primary_key = &api.api().primary_key;
            let parts = outcome.inspect_err(|error| warn!(%error, "remote constraint unresolved"))?;
            for (shape, result) in parts {
                match (shape, result) {
                    (CallShape::Exact, SecondaryResult::Empty) => {
                        warn!(primary_key = %primary_key, "exact remote constraint matched nothing");
                        return Err(GridError::NoOutputFound);
                    }
                    (CallShape::FreeText, SecondaryResult::Empty) => {
                        debug!(primary_key = %primary_key, "remote free text yielded no keys");
                    }
                    (_, result) => contributions.push((primary_key.clone(), result)),
                }
            }
        }
        if applicable > 0 && contributions.is_empty() {
            warn!(applicable, "no remote produced keys");
            return Err(GridError::NoOutputFound);
        }
        info!(applicable, resolved = contributions.len(), "secondary resolution complete");
        for (primary_key, result) in contributions {
            let (filter, query) = result.into_constraints(&primary_key);
            self.primary.update_query(filter, query);
        }
        Ok(())
    }
}
