//! Classification of broker request trace lines.
//!
//! Brokers with request logging enabled (`kafka.request.logger` at `DEBUG`) emit one line per
//! completed client request, e.g.
//! ```text
//! [2025-08-18 12:39:25,123] DEBUG Completed request:RequestHeader(apiKey=PRODUCE, apiVersion=9,
//! clientId=producer-1, correlationId=42, headerVersion=2) -- {acks=-1,timeout=30000,
//! partitionSizes=[orders-0=107]},response:... from connection 10.0.1.15:9098-10.0.2.33:51234-12;
//! totalTime:1.2,...,securityProtocol:SASL_SSL,principal:User:alice,listener:CLIENT,...
//! ```
//! (wrapped here, a single line in the log).
//!
//! The [`Classifier`] turns such a line into a [`RequestRecord`] or reports it as not applicable.
//! Each field has its own extraction rule and the authentication rules are tried in a fixed
//! priority order, see [`authenticate`].
use std::borrow::Cow;
use std::fmt;
use std::net::IpAddr;
use std::sync::OnceLock;

use derive_new::new;
use regex::Regex;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::Error;

/// Client id of the synthetic health-check client run by the managed Kafka platform.
pub const CANARY_CLIENT_ID: &str = "amazon.msk.canary.client";

fn trace_re() -> &'static Regex {
    static TRACE_RE: OnceLock<Regex> = OnceLock::new();
    TRACE_RE.get_or_init(|| {
        Regex::new(r"^\[([^\]]*)\]\s+(?:TRACE|DEBUG|INFO)\s+Completed request:")
            .expect("valid trace prefix regex")
    })
}

fn api_key_re() -> &'static Regex {
    static API_KEY_RE: OnceLock<Regex> = OnceLock::new();
    API_KEY_RE.get_or_init(|| Regex::new(r"apiKey=([A-Z_]+)").expect("valid api key regex"))
}

fn client_id_re() -> &'static Regex {
    static CLIENT_ID_RE: OnceLock<Regex> = OnceLock::new();
    CLIENT_ID_RE.get_or_init(|| Regex::new(r"clientId=([^,)]*)").expect("valid client id regex"))
}

fn replica_fetcher_re() -> &'static Regex {
    static REPLICA_FETCHER_RE: OnceLock<Regex> = OnceLock::new();
    REPLICA_FETCHER_RE.get_or_init(|| {
        Regex::new(r"^broker-\d+-fetcher-\d+$").expect("valid replica fetcher regex")
    })
}

fn anonymous_re() -> &'static Regex {
    static ANONYMOUS_RE: OnceLock<Regex> = OnceLock::new();
    ANONYMOUS_RE.get_or_init(|| {
        Regex::new(r"principal:(User:ANONYMOUS)\b").expect("valid anonymous principal regex")
    })
}

fn iam_re() -> &'static Regex {
    static IAM_RE: OnceLock<Regex> = OnceLock::new();
    IAM_RE.get_or_init(|| {
        Regex::new(r"\[IAM\]:\[(arn:[^\]\s]+)\]").expect("valid iam principal regex")
    })
}

fn ssl_protocol_re() -> &'static Regex {
    static SSL_PROTOCOL_RE: OnceLock<Regex> = OnceLock::new();
    SSL_PROTOCOL_RE.get_or_init(|| {
        Regex::new(r"securityProtocol:SSL\b").expect("valid security protocol regex")
    })
}

// The certificate subject may contain spaces, parentheses and `,OU=...` parts, so the match runs
// up to the next `,key:` field of the connection descriptor or the trailing logger name.
fn tls_re() -> &'static Regex {
    static TLS_RE: OnceLock<Regex> = OnceLock::new();
    TLS_RE.get_or_init(|| {
        Regex::new(r"principal:(User:CN=.+?)(?:,[A-Za-z]+:| \(kafka\.[a-z.]+\)$|$)")
            .expect("valid tls principal regex")
    })
}

fn scram_re() -> &'static Regex {
    static SCRAM_RE: OnceLock<Regex> = OnceLock::new();
    SCRAM_RE.get_or_init(|| {
        Regex::new(r"principal:(User:[^\s,\[\]]+)").expect("valid scram principal regex")
    })
}

fn partition_sizes_re() -> &'static Regex {
    static PARTITION_SIZES_RE: OnceLock<Regex> = OnceLock::new();
    PARTITION_SIZES_RE.get_or_init(|| {
        // anchors on the trailing `-<partition>=<size>` so topics may contain `-<digits>`
        Regex::new(r"partitionSizes=\[([^\],\s]+?)-\d+=\d+").expect("valid partition sizes regex")
    })
}

fn fetch_topic_re() -> &'static Regex {
    static FETCH_TOPIC_RE: OnceLock<Regex> = OnceLock::new();
    FETCH_TOPIC_RE.get_or_init(|| {
        Regex::new(r"FetchTopic\(topic='([^']*)'").expect("valid fetch topic regex")
    })
}

fn connection_re() -> &'static Regex {
    static CONNECTION_RE: OnceLock<Regex> = OnceLock::new();
    CONNECTION_RE.get_or_init(|| {
        Regex::new(r"from connection [^\s;]+?-(\[?[0-9A-Fa-f:.]+\]?):\d+-\d+;")
            .expect("valid connection regex")
    })
}

/// The request kinds relevant for client discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKind {
    Produce,
    Fetch,
}

impl ApiKind {
    fn from_api_key(key: &str) -> Option<Self> {
        match key {
            "PRODUCE" => Some(Self::Produce),
            "FETCH" => Some(Self::Fetch),
            _ => None,
        }
    }

    #[inline]
    pub fn role(self) -> Role {
        match self {
            Self::Produce => Role::Producer,
            Self::Fetch => Role::Consumer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Producer => "Producer",
            Self::Consumer => "Consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a client authenticated to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthKind {
    Iam,
    SaslScram,
    Tls,
    Unauthenticated,
    Unknown,
}

impl AuthKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Iam => "IAM",
            Self::SaslScram => "SASL_SCRAM",
            Self::Tls => "TLS",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a log file together with its origin.
#[derive(Debug, Clone, Copy, new)]
pub struct LogLine<'a> {
    /// Identifier of the file the line was read from
    pub file: &'a str,
    /// 1-based line number within the file
    pub number: usize,
    pub text: &'a str,
}

/// Fields that make up the identity of a client in the inventory.
///
/// The base identity is `client_id|topic|role|auth|principal`. The caller address is appended
/// only when `include_ip` is set, because the same client often connects from changing
/// addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, new)]
pub struct KeySchema {
    pub include_ip: bool,
}

/// Single client request recovered from a trace line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    timestamp: OffsetDateTime,
    api_kind: ApiKind,
    client_id: String,
    topic: String,
    ip_address: Option<IpAddr>,
    auth: AuthKind,
    principal: String,
    source_file: String,
    line_number: usize,
    raw_line: String,
    composite_key: String,
}

impl RequestRecord {
    #[inline]
    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    #[inline]
    pub fn api_kind(&self) -> ApiKind {
        self.api_kind
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.api_kind.role()
    }

    #[inline]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[inline]
    pub fn ip_address(&self) -> Option<IpAddr> {
        self.ip_address
    }

    #[inline]
    pub fn auth(&self) -> AuthKind {
        self.auth
    }

    #[inline]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    #[inline]
    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    #[inline]
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    #[inline]
    pub fn raw_line(&self) -> &str {
        &self.raw_line
    }

    /// Deduplication key derived from the identifying fields, see [`KeySchema`].
    #[inline]
    pub fn composite_key(&self) -> &str {
        &self.composite_key
    }

    fn key(&self, schema: KeySchema) -> String {
        let mut key = [
            self.client_id.as_str(),
            self.topic.as_str(),
            self.role().as_str(),
            self.auth.as_str(),
            self.principal.as_str(),
        ]
        .map(escape_key_field)
        .join("|");

        if schema.include_ip {
            key.push('|');
            if let Some(ip) = self.ip_address {
                key.push_str(&ip.to_string());
            }
        }

        key
    }
}

/// Escapes the key separator (and the escape character) inside a single key field.
fn escape_key_field(field: &str) -> Cow<'_, str> {
    if field.contains(|c: char| c == '|' || c == '\\') {
        Cow::Owned(field.replace('\\', "\\\\").replace('|', "\\|"))
    } else {
        Cow::Borrowed(field)
    }
}

/// Why a line did not produce a [`RequestRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not a completed-request trace line
    NotTrace,
    /// Request kind other than produce or fetch
    UnsupportedApi,
    /// Traffic of the platform canary or of inter-broker replication
    ExcludedClient,
    /// The request does not reference a topic name
    MissingTopic,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotTrace => "not_trace",
            Self::UnsupportedApi => "unsupported_api",
            Self::ExcludedClient => "excluded_client",
            Self::MissingTopic => "missing_topic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Request(RequestRecord),
    NotApplicable(SkipReason),
}

/// Extracts the requested API kind, `None` for any kind other than produce or fetch.
pub fn api_kind(line: &str) -> Option<ApiKind> {
    api_key_re()
        .captures(line)
        .and_then(|c| ApiKind::from_api_key(&c[1]))
}

pub fn client_id(line: &str) -> Option<&str> {
    client_id_re()
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Whether the client id belongs to traffic that is not an external client.
pub fn is_excluded_client(client_id: &str) -> bool {
    client_id == CANARY_CLIENT_ID || replica_fetcher_re().is_match(client_id)
}

pub fn anonymous_principal(line: &str) -> Option<String> {
    anonymous_re().captures(line).map(|c| c[1].to_owned())
}

pub fn iam_principal(line: &str) -> Option<String> {
    iam_re().captures(line).map(|c| c[1].to_owned())
}

pub fn tls_principal(line: &str) -> Option<String> {
    if !ssl_protocol_re().is_match(line) {
        return None;
    }
    tls_re().captures(line).map(|c| c[1].trim_end().to_owned())
}

pub fn scram_principal(line: &str) -> Option<String> {
    scram_re()
        .captures(line)
        .map(|c| c[1].to_owned())
        .filter(|principal| !principal.starts_with("User:CN="))
}

type AuthRule = fn(&str) -> Option<String>;

/// Authentication rules in priority order; the first rule that matches wins.
///
/// IAM and TLS principals are more specific than the generic `User:<name>` form and must be
/// tried before it.
const AUTH_RULES: [(AuthKind, AuthRule); 4] = [
    (AuthKind::Unauthenticated, anonymous_principal),
    (AuthKind::Iam, iam_principal),
    (AuthKind::Tls, tls_principal),
    (AuthKind::SaslScram, scram_principal),
];

/// Determines the authentication kind and principal of a request line.
pub fn authenticate(line: &str) -> (AuthKind, String) {
    AUTH_RULES
        .iter()
        .find_map(|(kind, rule)| rule(line).map(|principal| (*kind, principal)))
        .unwrap_or((AuthKind::Unknown, String::new()))
}

/// Extracts the (first) topic a request refers to.
pub fn topic(line: &str, kind: ApiKind) -> Option<&str> {
    let re = match kind {
        ApiKind::Produce => partition_sizes_re(),
        ApiKind::Fetch => fetch_topic_re(),
    };

    re.captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|topic| !topic.is_empty())
}

/// Extracts the client side address of the connection descriptor, if present.
pub fn ip_address(line: &str) -> Option<IpAddr> {
    connection_re()
        .captures(line)
        .and_then(|c| c[1].trim_matches(|c| c == '[' || c == ']').parse().ok())
}

/// Parses the broker timestamp format `YYYY-MM-DD HH:MM:SS,mmm` as UTC.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, Error> {
    let format = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second],[subsecond digits:3]"
    );

    PrimitiveDateTime::parse(value.trim(), format)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|source| Error::Timestamp {
            value: value.to_owned(),
            source,
        })
}

/// Turns trace lines into [`RequestRecord`]s keyed according to its [`KeySchema`].
#[derive(Debug, Clone, Copy, Default, new)]
pub struct Classifier {
    schema: KeySchema,
}

impl Classifier {
    /// Classify a single log line.
    ///
    /// Lines outside of scope yield [`Classification::NotApplicable`]. The only error is an
    /// unparsable timestamp on an otherwise valid request line.
    pub fn classify(&self, line: &LogLine<'_>) -> Result<Classification, Error> {
        use Classification::NotApplicable;

        let text = line.text;

        let Some(prefix) = trace_re().captures(text) else {
            return Ok(NotApplicable(SkipReason::NotTrace));
        };

        let Some(api_kind) = api_kind(text) else {
            return Ok(NotApplicable(SkipReason::UnsupportedApi));
        };

        let client_id = client_id(text).unwrap_or_default();
        if is_excluded_client(client_id) {
            return Ok(NotApplicable(SkipReason::ExcludedClient));
        }

        let (auth, principal) = authenticate(text);

        let Some(topic) = topic(text, api_kind) else {
            return Ok(NotApplicable(SkipReason::MissingTopic));
        };

        let timestamp = parse_timestamp(&prefix[1])?;

        let mut record = RequestRecord {
            timestamp,
            api_kind,
            client_id: client_id.to_owned(),
            topic: topic.to_owned(),
            ip_address: ip_address(text),
            auth,
            principal,
            source_file: line.file.to_owned(),
            line_number: line.number,
            raw_line: text.to_owned(),
            composite_key: String::new(),
        };
        record.composite_key = record.key(self.schema);

        Ok(Classification::Request(record))
    }
}

/// Classify a line with the default [`KeySchema`].
#[inline]
pub fn classify(line: &LogLine<'_>) -> Result<Classification, Error> {
    Classifier::default().classify(line)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rstest::*;
    use time::macros::datetime;

    pub(crate) const PRODUCE_IAM: &str = "[2025-08-18 12:39:25,123] DEBUG Completed request:\
        RequestHeader(apiKey=PRODUCE, apiVersion=9, clientId=TESTING_PRODUCER-1, \
        correlationId=42, headerVersion=2) -- {acks=-1,timeout=30000,\
        partitionSizes=[customers1-0=107]},response:{responses=[]} \
        from connection 10.0.1.15:9098-10.0.2.33:51234-12;totalTime:1.2,requestQueueTime:0.1,\
        localTime:0.9,remoteTime:0.0,throttleTime:0,responseQueueTime:0.1,sendTime:0.1,\
        securityProtocol:SASL_SSL,\
        principal:[IAM]:[arn:aws:sts::000123456789:assumed-role/kcp-testing-role/testing-sts],\
        listener:CLIENT_SASL_SSL,clientInformation:ClientInformation(softwareName=apache-kafka-java, \
        softwareVersion=3.7.0) (kafka.request.logger)";

    pub(crate) const FETCH_TLS: &str = "[2025-08-18 12:40:01,007] DEBUG Completed request:\
        RequestHeader(apiKey=FETCH, apiVersion=12, clientId=sarama, correlationId=7, \
        headerVersion=2) -- FetchRequestData(clusterId=null, replicaId=-1, maxWaitMs=500, \
        minBytes=1, maxBytes=104857600, isolationLevel=0, sessionId=0, sessionEpoch=-1, \
        topics=[FetchTopic(topic='test-topic-1', topicId=AAAAAAAAAAAAAAAAAAAAAA, \
        partitions=[FetchPartition(partition=0, fetchOffset=0, partitionMaxBytes=1048576)])], \
        forgottenTopicsData=[], rackId=''),response:{} \
        from connection 10.0.1.15:9094-10.0.3.7:40122-3;totalTime:502.1,\
        securityProtocol:SSL,principal:User:CN=kcp_tls_testing,listener:CLIENT_SECURE,\
        clientInformation:ClientInformation(softwareName=sarama, softwareVersion=1.43.0) \
        (kafka.request.logger)";

    /// Produce request authenticated with SASL/SCRAM as `principal`.
    pub(crate) fn produce_scram(timestamp: &str, client: &str, topic: &str) -> String {
        format!(
            "[{timestamp}] DEBUG Completed request:RequestHeader(apiKey=PRODUCE, apiVersion=9, \
            clientId={client}, correlationId=1, headerVersion=2) -- {{acks=1,timeout=30000,\
            partitionSizes=[{topic}-0=64,{topic}-1=12]}},response:{{}} \
            from connection 10.0.1.15:9096-10.0.4.2:33000-1;totalTime:0.8,\
            securityProtocol:SASL_SSL,principal:User:alice,listener:CLIENT_SASL_SCRAM,\
            clientInformation:ClientInformation(softwareName=librdkafka, softwareVersion=2.3.0) \
            (kafka.request.logger)"
        )
    }

    fn request(text: &str) -> RequestRecord {
        match classify(&LogLine::new("broker-1.log", 1, text)).expect("valid line") {
            Classification::Request(record) => record,
            Classification::NotApplicable(reason) => panic!("line skipped: {reason:?}"),
        }
    }

    fn skipped(text: &str) -> SkipReason {
        match classify(&LogLine::new("broker-1.log", 1, text)).expect("valid line") {
            Classification::Request(record) => panic!("unexpected request: {record:?}"),
            Classification::NotApplicable(reason) => reason,
        }
    }

    #[test]
    fn iam_producer() {
        let record = request(PRODUCE_IAM);

        assert_eq!(record.api_kind(), ApiKind::Produce);
        assert_eq!(record.role(), Role::Producer);
        assert_eq!(record.client_id(), "TESTING_PRODUCER-1");
        assert_eq!(record.topic(), "customers1");
        assert_eq!(record.auth(), AuthKind::Iam);
        assert_eq!(
            record.principal(),
            "arn:aws:sts::000123456789:assumed-role/kcp-testing-role/testing-sts"
        );
        assert_eq!(record.ip_address(), Some("10.0.2.33".parse().unwrap()));
        assert_eq!(record.timestamp(), datetime!(2025-08-18 12:39:25.123 UTC));
        assert_eq!(record.source_file(), "broker-1.log");
        assert_eq!(record.line_number(), 1);
        assert_eq!(record.raw_line(), PRODUCE_IAM);
    }

    #[test]
    fn tls_consumer() {
        let record = request(FETCH_TLS);

        assert_eq!(record.role(), Role::Consumer);
        assert_eq!(record.client_id(), "sarama");
        assert_eq!(record.topic(), "test-topic-1");
        assert_eq!(record.auth(), AuthKind::Tls);
        assert_eq!(record.principal(), "User:CN=kcp_tls_testing");
        assert_eq!(
            record.composite_key(),
            "sarama|test-topic-1|Consumer|TLS|User:CN=kcp_tls_testing"
        );
    }

    #[rstest]
    #[case::spaces("User:CN=Jane Doe,OU=Data Platform,O=Acme Corp")]
    #[case::parentheses("User:CN=Jane (Ops),O=Acme")]
    #[case::trailing_parentheses("User:CN=billing (eu-west-1)")]
    fn tls_subject_with_spaces(#[case] principal: &str) {
        let line = FETCH_TLS.replace("User:CN=kcp_tls_testing", principal);
        let record = request(&line);
        assert_eq!(record.auth(), AuthKind::Tls);
        assert_eq!(record.principal(), principal);
    }

    #[test]
    fn tls_subject_at_end_of_line() {
        let line = "securityProtocol:SSL,principal:User:CN=Jane (Ops),O=Acme (kafka.request.logger)";
        assert_eq!(
            tls_principal(line).as_deref(),
            Some("User:CN=Jane (Ops),O=Acme")
        );
    }

    #[test]
    fn tls_wins_over_generic_user() {
        let line = FETCH_TLS;
        assert!(tls_principal(line).is_some());
        assert_eq!(authenticate(line).0, AuthKind::Tls);

        // IAM principals are never taken for SASL/SCRAM users
        assert_eq!(scram_principal(PRODUCE_IAM), None);
        assert_eq!(authenticate(PRODUCE_IAM).0, AuthKind::Iam);
    }

    #[test]
    fn cn_principal_without_ssl_is_not_tls() {
        let line = FETCH_TLS.replace("securityProtocol:SSL", "securityProtocol:SASL_SSL");
        assert_eq!(tls_principal(&line), None);
        assert_eq!(authenticate(&line), (AuthKind::Unknown, String::new()));
    }

    #[rstest]
    #[case::scram("principal:User:alice,listener:X", AuthKind::SaslScram, "User:alice")]
    #[case::anonymous(
        "securityProtocol:PLAINTEXT,principal:User:ANONYMOUS,listener:X",
        AuthKind::Unauthenticated,
        "User:ANONYMOUS"
    )]
    #[case::iam(
        "principal:[IAM]:[arn:aws:iam::000123456789:user/bob],listener:X",
        AuthKind::Iam,
        "arn:aws:iam::000123456789:user/bob"
    )]
    #[case::missing("securityProtocol:PLAINTEXT,listener:X", AuthKind::Unknown, "")]
    fn authentication(#[case] line: &str, #[case] kind: AuthKind, #[case] principal: &str) {
        assert_eq!(authenticate(line), (kind, principal.to_owned()));
    }

    #[rstest]
    #[case::simple("partitionSizes=[orders-0=1]", "orders")]
    #[case::trailing_digits("partitionSizes=[orders-2024-11=10]", "orders-2024")]
    #[case::hyphenated("partitionSizes=[a-b-c-0=5,x-1=2]", "a-b-c")]
    #[case::dotted("partitionSizes=[payments.v1-3=0]", "payments.v1")]
    fn produce_topic(#[case] line: &str, #[case] expected: &str) {
        assert_eq!(topic(line, ApiKind::Produce), Some(expected));
    }

    #[rstest]
    #[case::empty_sizes("partitionSizes=[]", ApiKind::Produce)]
    #[case::topic_id_only("topics=[FetchTopic(topic='', topicId=abc", ApiKind::Fetch)]
    #[case::absent("nothing here", ApiKind::Fetch)]
    fn no_topic(#[case] line: &str, #[case] kind: ApiKind) {
        assert_eq!(topic(line, kind), None);
    }

    #[rstest]
    #[case::canary(CANARY_CLIENT_ID)]
    #[case::replica_fetcher("broker-2-fetcher-0")]
    #[case::replica_fetcher_multi_digit("broker-12-fetcher-31")]
    fn excluded_clients(#[case] client: &str) {
        let line = produce_scram("2025-08-18 12:00:00,000", client, "orders");
        assert_eq!(skipped(&line), SkipReason::ExcludedClient);
    }

    #[rstest]
    #[case::similar_name("broker-2-fetcher")]
    #[case::prefixed("my-broker-1-fetcher-1")]
    #[case::empty("")]
    fn regular_clients(#[case] client: &str) {
        let line = produce_scram("2025-08-18 12:00:00,000", client, "orders");
        assert_eq!(request(&line).client_id(), client);
    }

    #[rstest]
    #[case::metadata("METADATA")]
    #[case::heartbeat("HEARTBEAT")]
    #[case::offset_commit("OFFSET_COMMIT")]
    #[case::api_versions("API_VERSIONS")]
    fn unsupported_api(#[case] key: &str) {
        let line = PRODUCE_IAM.replace("apiKey=PRODUCE", &format!("apiKey={key}"));
        assert_eq!(skipped(&line), SkipReason::UnsupportedApi);
    }

    #[rstest]
    #[case::empty("")]
    #[case::other_logger("[2025-08-18 12:39:25,123] INFO [LogLoader partition=a-0] Loaded")]
    #[case::no_prefix("DEBUG Completed request:RequestHeader(apiKey=PRODUCE, clientId=x)")]
    fn not_trace(#[case] line: &str) {
        assert_eq!(skipped(line), SkipReason::NotTrace);
    }

    #[test]
    fn malformed_timestamp_is_error() {
        let line = produce_scram("2025-13-45 99:00:00,000", "producer", "orders");
        let result = classify(&LogLine::new("broker-1.log", 3, &line));
        assert!(matches!(result, Err(Error::Timestamp { .. })));
    }

    #[test]
    fn timestamp_format() {
        assert_eq!(
            parse_timestamp("2024-02-29 23:59:59,999").unwrap(),
            datetime!(2024-02-29 23:59:59.999 UTC)
        );
        assert!(parse_timestamp("2024-02-29T23:59:59.999").is_err());
        assert!(parse_timestamp("2024-02-29 23:59:59").is_err());
    }

    #[test]
    fn classification_is_pure() {
        let line = LogLine::new("broker-1.log", 7, FETCH_TLS);
        assert_eq!(classify(&line).unwrap(), classify(&line).unwrap());
    }

    #[test]
    fn key_schema_with_ip() {
        let classifier = Classifier::new(KeySchema::new(true));
        let line = LogLine::new("broker-1.log", 1, PRODUCE_IAM);
        let Classification::Request(record) = classifier.classify(&line).unwrap() else {
            panic!("line skipped");
        };
        assert_eq!(
            record.composite_key(),
            "TESTING_PRODUCER-1|customers1|Producer|IAM|\
            arn:aws:sts::000123456789:assumed-role/kcp-testing-role/testing-sts|10.0.2.33"
        );
    }

    #[test]
    fn separator_inside_key_fields() {
        let a = request(&produce_scram("2025-08-18 12:00:00,000", "a|b", "c"));
        let b = request(&produce_scram("2025-08-18 12:00:00,000", "a", "b|c"));

        assert_eq!(a.client_id(), "a|b");
        assert_eq!(b.topic(), "b|c");
        assert_ne!(a.composite_key(), b.composite_key());
        assert_eq!(
            a.composite_key(),
            r"a\|b|c|Producer|SASL_SCRAM|User:alice"
        );

        let escaped = request(&produce_scram("2025-08-18 12:00:00,000", r"a\", "|c"));
        assert_ne!(escaped.composite_key(), a.composite_key());
        assert_ne!(escaped.composite_key(), b.composite_key());
    }

    #[test]
    fn missing_connection_descriptor() {
        let line = produce_scram("2025-08-18 12:00:00,000", "producer", "orders").replace(
            "from connection 10.0.1.15:9096-10.0.4.2:33000-1;",
            "",
        );
        assert_eq!(request(&line).ip_address(), None);
    }
}
