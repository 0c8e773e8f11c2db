//! Endpoint routing: `(endpoint, params) -> (method, path, cache key)`.
//!
//! The table is built once at startup and handed to whoever needs it; the path
//! builders are pure functions, so there is no shared mutable registry.
//!
//! Cache keys have the shape `<endpoint>:<member or ->:<entity or ->` with an
//! optional `:p<page>` suffix. The key without the suffix is the page-family
//! prefix used to find the latest validator across pages.

use std::collections::HashMap;
use std::fmt;

use reqwest::Method;

use crate::client::FetchError;

/// Every remote resource the ingestor touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    // Member scoped.
    Assets,
    Contacts,
    Contracts,
    ContractItems,
    ContractBids,
    MailHeaders,
    MailBody,
    MailLabels,
    MailingLists,
    Skills,
    SkillQueue,
    WalletBalance,
    WalletTransactions,
    WalletJournal,
    Fittings,
    // Public universe.
    Character,
    Corporation,
    Alliance,
    Station,
    Structure,
    SolarSystem,
    Constellation,
    Region,
    Regions,
    Categories,
    Category,
    Group,
    ItemType,
    Races,
    Bloodlines,
    Ancestries,
    Names,
}

impl Endpoint {
    /// All endpoints, in declaration order.
    pub const ALL: [Self; 32] = [
        Self::Assets,
        Self::Contacts,
        Self::Contracts,
        Self::ContractItems,
        Self::ContractBids,
        Self::MailHeaders,
        Self::MailBody,
        Self::MailLabels,
        Self::MailingLists,
        Self::Skills,
        Self::SkillQueue,
        Self::WalletBalance,
        Self::WalletTransactions,
        Self::WalletJournal,
        Self::Fittings,
        Self::Character,
        Self::Corporation,
        Self::Alliance,
        Self::Station,
        Self::Structure,
        Self::SolarSystem,
        Self::Constellation,
        Self::Region,
        Self::Regions,
        Self::Categories,
        Self::Category,
        Self::Group,
        Self::ItemType,
        Self::Races,
        Self::Bloodlines,
        Self::Ancestries,
        Self::Names,
    ];

    /// Stable name used in cache keys and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assets => "assets",
            Self::Contacts => "contacts",
            Self::Contracts => "contracts",
            Self::ContractItems => "contract_items",
            Self::ContractBids => "contract_bids",
            Self::MailHeaders => "mail_headers",
            Self::MailBody => "mail_body",
            Self::MailLabels => "mail_labels",
            Self::MailingLists => "mailing_lists",
            Self::Skills => "skills",
            Self::SkillQueue => "skill_queue",
            Self::WalletBalance => "wallet_balance",
            Self::WalletTransactions => "wallet_transactions",
            Self::WalletJournal => "wallet_journal",
            Self::Fittings => "fittings",
            Self::Character => "character",
            Self::Corporation => "corporation",
            Self::Alliance => "alliance",
            Self::Station => "station",
            Self::Structure => "structure",
            Self::SolarSystem => "solar_system",
            Self::Constellation => "constellation",
            Self::Region => "region",
            Self::Regions => "regions",
            Self::Categories => "categories",
            Self::Category => "category",
            Self::Group => "group",
            Self::ItemType => "type",
            Self::Races => "races",
            Self::Bloodlines => "bloodlines",
            Self::Ancestries => "ancestries",
            Self::Names => "names",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity parameters of one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointParams {
    /// Owning member, for member-scoped endpoints.
    pub member_id: Option<i64>,
    /// Target entity (contract, mail, station, type, ...).
    pub entity_id: Option<i64>,
    /// Page number, for paginated endpoints.
    pub page: Option<u32>,
}

impl EndpointParams {
    /// Params for a member's collection.
    #[must_use]
    pub fn member(member_id: i64) -> Self {
        Self {
            member_id: Some(member_id),
            ..Self::default()
        }
    }

    /// Params for a public entity.
    #[must_use]
    pub fn entity(entity_id: i64) -> Self {
        Self {
            entity_id: Some(entity_id),
            ..Self::default()
        }
    }

    /// Params for a member's child resource (contract items, mail body, ...).
    #[must_use]
    pub fn member_entity(member_id: i64, entity_id: i64) -> Self {
        Self {
            member_id: Some(member_id),
            entity_id: Some(entity_id),
            page: None,
        }
    }

    /// Same params with a page number.
    #[must_use]
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }
}

type PathFn = fn(Endpoint, &EndpointParams) -> Result<String, FetchError>;

/// Static routing data for one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    /// HTTP method.
    pub method: Method,
    /// Builds the path from params.
    pub path: PathFn,
    /// Whether a member bearer token is required.
    pub auth: bool,
    /// Whether the endpoint advertises `X-Pages`.
    pub paginated: bool,
}

/// A fully resolved request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// Which endpoint.
    pub endpoint: Endpoint,
    /// HTTP method.
    pub method: Method,
    /// Path below the base URL.
    pub path: String,
    /// Validator / cache key including any page suffix.
    pub cache_key: String,
    /// Key without the page suffix.
    pub prefix: String,
    /// Whether a member bearer token is required.
    pub auth: bool,
    /// Whether the endpoint advertises `X-Pages`.
    pub paginated: bool,
    /// Member the token must be valid for, when `auth` is set.
    pub member_id: Option<i64>,
    /// Page number to request, if any.
    pub page: Option<u32>,
}

fn require_member(endpoint: Endpoint, params: &EndpointParams) -> Result<i64, FetchError> {
    params
        .member_id
        .ok_or_else(|| FetchError::invalid_request(format!("member id required for {endpoint}")))
}

fn require_entity(endpoint: Endpoint, params: &EndpointParams) -> Result<i64, FetchError> {
    params
        .entity_id
        .ok_or_else(|| FetchError::invalid_request(format!("entity id required for {endpoint}")))
}

fn member_path(endpoint: Endpoint, params: &EndpointParams, suffix: &str) -> Result<String, FetchError> {
    let member = require_member(endpoint, params)?;
    Ok(format!("/characters/{member}/{suffix}"))
}

fn assets(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    member_path(e, p, "assets/")
}
fn contacts(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    member_path(e, p, "contacts/")
}
fn contracts(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    member_path(e, p, "contracts/")
}
fn contract_items(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    let member = require_member(e, p)?;
    let contract = require_entity(e, p)?;
    Ok(format!("/characters/{member}/contracts/{contract}/items/"))
}
fn contract_bids(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    let member = require_member(e, p)?;
    let contract = require_entity(e, p)?;
    Ok(format!("/characters/{member}/contracts/{contract}/bids/"))
}
fn mail_headers(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    member_path(e, p, "mail/")
}
fn mail_body(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    let member = require_member(e, p)?;
    let mail = require_entity(e, p)?;
    Ok(format!("/characters/{member}/mail/{mail}/"))
}
fn mail_labels(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    member_path(e, p, "mail/labels/")
}
fn mailing_lists(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    member_path(e, p, "mail/lists/")
}
fn skills(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    member_path(e, p, "skills/")
}
fn skill_queue(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    member_path(e, p, "skillqueue/")
}
fn wallet_balance(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    member_path(e, p, "wallet/")
}
fn wallet_transactions(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    member_path(e, p, "wallet/transactions/")
}
fn wallet_journal(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    member_path(e, p, "wallet/journal/")
}
fn fittings(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    member_path(e, p, "fittings/")
}

fn entity_path(e: Endpoint, p: &EndpointParams) -> Result<String, FetchError> {
    let id = require_entity(e, p)?;
    let base = match e {
        Endpoint::Character => "/characters",
        Endpoint::Corporation => "/corporations",
        Endpoint::Alliance => "/alliances",
        Endpoint::Station => "/universe/stations",
        Endpoint::Structure => "/universe/structures",
        Endpoint::SolarSystem => "/universe/systems",
        Endpoint::Constellation => "/universe/constellations",
        Endpoint::Region => "/universe/regions",
        Endpoint::Category => "/universe/categories",
        Endpoint::Group => "/universe/groups",
        Endpoint::ItemType => "/universe/types",
        other => {
            return Err(FetchError::invalid_request(format!(
                "{other} is not an entity endpoint"
            )));
        }
    };
    Ok(format!("{base}/{id}/"))
}

fn list_path(e: Endpoint, _p: &EndpointParams) -> Result<String, FetchError> {
    let path = match e {
        Endpoint::Regions => "/universe/regions/",
        Endpoint::Categories => "/universe/categories/",
        Endpoint::Races => "/universe/races/",
        Endpoint::Bloodlines => "/universe/bloodlines/",
        Endpoint::Ancestries => "/universe/ancestries/",
        Endpoint::Names => "/universe/names/",
        other => {
            return Err(FetchError::invalid_request(format!(
                "{other} is not a list endpoint"
            )));
        }
    };
    Ok(path.to_string())
}

fn spec_for(endpoint: Endpoint) -> EndpointSpec {
    let member = |path: PathFn, paginated: bool| EndpointSpec {
        method: Method::GET,
        path,
        auth: true,
        paginated,
    };
    let public = |path: PathFn| EndpointSpec {
        method: Method::GET,
        path,
        auth: false,
        paginated: false,
    };

    match endpoint {
        Endpoint::Assets => member(assets, true),
        Endpoint::Contacts => member(contacts, false),
        Endpoint::Contracts => member(contracts, true),
        Endpoint::ContractItems => member(contract_items, false),
        Endpoint::ContractBids => member(contract_bids, false),
        Endpoint::MailHeaders => member(mail_headers, false),
        Endpoint::MailBody => member(mail_body, false),
        Endpoint::MailLabels => member(mail_labels, false),
        Endpoint::MailingLists => member(mailing_lists, false),
        Endpoint::Skills => member(skills, false),
        Endpoint::SkillQueue => member(skill_queue, false),
        Endpoint::WalletBalance => member(wallet_balance, false),
        Endpoint::WalletTransactions => member(wallet_transactions, false),
        Endpoint::WalletJournal => member(wallet_journal, true),
        Endpoint::Fittings => member(fittings, false),
        Endpoint::Structure => EndpointSpec {
            method: Method::GET,
            path: entity_path,
            auth: true,
            paginated: false,
        },
        Endpoint::Character
        | Endpoint::Corporation
        | Endpoint::Alliance
        | Endpoint::Station
        | Endpoint::SolarSystem
        | Endpoint::Constellation
        | Endpoint::Region
        | Endpoint::Category
        | Endpoint::Group
        | Endpoint::ItemType => public(entity_path),
        Endpoint::Regions
        | Endpoint::Categories
        | Endpoint::Races
        | Endpoint::Bloodlines
        | Endpoint::Ancestries => public(list_path),
        Endpoint::Names => EndpointSpec {
            method: Method::POST,
            path: list_path,
            auth: false,
            paginated: false,
        },
    }
}

/// Builds the validator / cache key for `endpoint` and `params`.
#[must_use]
pub fn cache_key(endpoint: Endpoint, params: &EndpointParams) -> String {
    let prefix = cache_prefix(endpoint, params);
    match params.page {
        Some(page) => format!("{prefix}:p{page}"),
        None => prefix,
    }
}

/// Builds the page-family prefix (cache key without the page suffix).
#[must_use]
pub fn cache_prefix(endpoint: Endpoint, params: &EndpointParams) -> String {
    let member = params
        .member_id
        .map_or_else(|| "-".to_string(), |id| id.to_string());
    let entity = params
        .entity_id
        .map_or_else(|| "-".to_string(), |id| id.to_string());
    format!("{endpoint}:{member}:{entity}")
}

/// Lookup table from endpoint to routing data.
#[derive(Debug, Clone)]
pub struct EndpointTable {
    specs: HashMap<Endpoint, EndpointSpec>,
}

impl Default for EndpointTable {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointTable {
    /// Builds the table.
    #[must_use]
    pub fn new() -> Self {
        let specs = Endpoint::ALL
            .iter()
            .map(|&endpoint| (endpoint, spec_for(endpoint)))
            .collect();
        Self { specs }
    }

    /// Returns the routing data for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidRequest`] if the endpoint is not registered.
    pub fn spec(&self, endpoint: Endpoint) -> Result<&EndpointSpec, FetchError> {
        self.specs
            .get(&endpoint)
            .ok_or_else(|| FetchError::invalid_request(format!("unregistered endpoint {endpoint}")))
    }

    /// Resolves `endpoint` with `params` into a request target.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidRequest`] when a required parameter is missing.
    pub fn resolve(
        &self,
        endpoint: Endpoint,
        params: &EndpointParams,
    ) -> Result<ResolvedEndpoint, FetchError> {
        let spec = self.spec(endpoint)?;
        let path = (spec.path)(endpoint, params)?;
        if spec.auth && params.member_id.is_none() {
            return Err(FetchError::invalid_request(format!(
                "member id required to authenticate {endpoint}"
            )));
        }

        Ok(ResolvedEndpoint {
            endpoint,
            method: spec.method.clone(),
            path,
            cache_key: cache_key(endpoint, params),
            prefix: cache_prefix(endpoint, params),
            auth: spec.auth,
            paginated: spec.paginated,
            member_id: params.member_id,
            page: params.page,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_table_registers_every_endpoint() {
        let table = EndpointTable::new();
        for endpoint in Endpoint::ALL {
            assert!(table.spec(endpoint).is_ok(), "{endpoint} missing");
        }
    }

    #[test]
    fn test_endpoint_names_are_unique() {
        let mut names: Vec<&str> = Endpoint::ALL.iter().map(Endpoint::as_str).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Endpoint::ALL.len());
    }

    #[test]
    fn test_resolve_member_collection() {
        let table = EndpointTable::new();
        let resolved = table
            .resolve(Endpoint::Assets, &EndpointParams::member(90_000_001).with_page(2))
            .unwrap();

        assert_eq!(resolved.path, "/characters/90000001/assets/");
        assert_eq!(resolved.cache_key, "assets:90000001:-:p2");
        assert_eq!(resolved.prefix, "assets:90000001:-");
        assert_eq!(resolved.method, Method::GET);
        assert!(resolved.auth);
        assert!(resolved.paginated);
    }

    #[test]
    fn test_resolve_child_resource() {
        let table = EndpointTable::new();
        let resolved = table
            .resolve(
                Endpoint::ContractItems,
                &EndpointParams::member_entity(90_000_001, 555),
            )
            .unwrap();
        assert_eq!(resolved.path, "/characters/90000001/contracts/555/items/");
        assert_eq!(resolved.cache_key, "contract_items:90000001:555");
    }

    #[test]
    fn test_resolve_public_entity_and_lists() {
        let table = EndpointTable::new();

        let station = table
            .resolve(Endpoint::Station, &EndpointParams::entity(60_003_760))
            .unwrap();
        assert_eq!(station.path, "/universe/stations/60003760/");
        assert_eq!(station.cache_key, "station:-:60003760");
        assert!(!station.auth);

        let regions = table
            .resolve(Endpoint::Regions, &EndpointParams::default())
            .unwrap();
        assert_eq!(regions.path, "/universe/regions/");

        let names = table
            .resolve(Endpoint::Names, &EndpointParams::default())
            .unwrap();
        assert_eq!(names.method, Method::POST);
    }

    #[test]
    fn test_resolve_missing_parameters_is_invalid_request() {
        let table = EndpointTable::new();

        let err = table
            .resolve(Endpoint::Skills, &EndpointParams::default())
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest { .. }));

        let err = table
            .resolve(Endpoint::MailBody, &EndpointParams::member(1))
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest { .. }));

        let err = table
            .resolve(Endpoint::Group, &EndpointParams::default())
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest { .. }));
    }

    #[test]
    fn test_structure_requires_member_for_auth() {
        let table = EndpointTable::new();
        let err = table
            .resolve(Endpoint::Structure, &EndpointParams::entity(1_022_734_985_679))
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest { .. }));

        let ok = table
            .resolve(
                Endpoint::Structure,
                &EndpointParams::member_entity(90_000_001, 1_022_734_985_679),
            )
            .unwrap();
        assert_eq!(ok.path, "/universe/structures/1022734985679/");
        assert_eq!(ok.cache_key, "structure:90000001:1022734985679");
    }
}
