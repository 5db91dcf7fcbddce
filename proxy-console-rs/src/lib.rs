//! State layer of the proxy admin console: which admin is signed in, which page is open, and live views of the
//! proxy's collections.

pub mod config;
pub mod model;
pub mod routes;
pub mod stats;

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::OnceLock;

use chrono::{Local, Utc};
use futures::task::LocalSpawn;
use tether::{
    CollectionSync, History, Identity, IdentityObserver, Navigation, Observable, RecordStore, Session, SingleSync,
    SyncError, Transform,
};

pub use config::{ConfigError, ConsoleConfig};
pub use model::{Account, Admin, Base, Client, ClientType, Code, Home, Request, Resource, Token, TokenStatus};
pub use routes::Page;
pub use stats::{RequestStats, TimeFrame};

/// Query parameter the login page uses to remember where to go afterwards.
pub const NEXT_KEY: &str = "next";

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
static LOGGER: OnceLock<()> = OnceLock::new();

pub fn init_logging(config: &ConsoleConfig) {
    LOGGER.get_or_init(|| {
        #[cfg(not(target_arch = "wasm32"))]
        {
            if let Err(e) = env_logger::Builder::new()
                .parse_filters(&config.log_filter)
                .try_init()
            {
                // the host already installed a logger, which is fine
                log::debug!("Keeping existing logger: {e}");
            }
        }
        #[cfg(target_arch = "wasm32")]
        {
            let level = config.log_filter.parse().unwrap_or(log::Level::Info);
            wasm_logger::init(wasm_logger::Config::new(level));
        }
        log::info!("Logging initialized");
    });
}

/// Which tokens the tokens page lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenView {
    All,
    Account(String),
    Valid,
}

pub struct Console<St: RecordStore, Sp: LocalSpawn> {
    store: St,
    spawner: Sp,
    config: ConsoleConfig,
    identity: IdentityObserver<Admin>,
    navigation: Navigation,
}

impl<St: RecordStore, Sp: LocalSpawn> Console<St, Sp> {
    pub fn new(
        store: St,
        spawner: Sp,
        session: Rc<dyn Session<Admin>>,
        history: Rc<dyn History>,
        config: ConsoleConfig,
    ) -> Self {
        init_logging(&config);

        Self {
            store,
            spawner,
            config,
            identity: IdentityObserver::start(session),
            navigation: Navigation::start(history),
        }
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn identity(&self) -> Observable<Identity<Admin>> {
        self.identity.state()
    }

    pub fn navigation(&self) -> &Navigation {
        &self.navigation
    }

    pub fn page(&self) -> Page {
        Page::from_route(&self.navigation.current())
    }

    /// Navigates to `page`, then applies [`Self::guard`]. Returns the page that ends up open.
    pub fn open(&self, page: &Page) -> Page {
        self.navigation.navigate(&page.path(), None);
        self.guard()
    }

    /// Sends a visitor without a valid identity to the login page, remembering where they were.
    pub fn guard(&self) -> Page {
        let page = self.page();
        if !page.requires_identity() || self.identity.current().signed_in() {
            return page;
        }

        let next = self.navigation.current().to_url();
        log::info!("Not signed in, redirecting {next} to the login page");
        self.navigation.navigate(
            &Page::Login.path(),
            Some(BTreeMap::from([(NEXT_KEY.to_string(), next)])),
        );
        Page::Login
    }

    /// Leaves the login page for the page remembered by [`Self::guard`], or the dashboard.
    pub fn after_sign_in(&self) -> Page {
        if self.page() != Page::Login || !self.identity.current().signed_in() {
            return self.page();
        }
        let target = self
            .navigation
            .get_query(NEXT_KEY)
            .filter(|next| next.starts_with('/') && !next.starts_with("//"))
            .unwrap_or_else(|| Page::Dashboard.path());
        let route = tether::Route::parse(&target);
        self.navigation.navigate(&route.path, Some(route.query));
        self.page()
    }

    pub fn time_frame(&self) -> TimeFrame {
        TimeFrame::from_route(&self.navigation.current()).unwrap_or(self.config.default_time_frame)
    }

    pub fn set_time_frame(&self, frame: TimeFrame) {
        self.navigation.set_query(TimeFrame::QUERY_KEY, frame.as_str());
    }

    pub async fn accounts(&self) -> Result<CollectionSync<Account>, SyncError> {
        let by_email = Transform::sort_by_key(|account: &Account| account.email.to_lowercase());
        self.collection(None, by_email).await
    }

    pub async fn account(&self, id: &str) -> Result<SingleSync<Account>, SyncError> {
        self.single(id).await
    }

    pub async fn clients(&self) -> Result<CollectionSync<Client>, SyncError> {
        self.collection(None, Transform::sort_by_key(|client: &Client| client.name.clone()))
            .await
    }

    pub async fn client(&self, id: &str) -> Result<SingleSync<Client>, SyncError> {
        self.single(id).await
    }

    pub async fn codes_for_client(&self, client_id: &str) -> Result<CollectionSync<Code>, SyncError> {
        let filter = format!("client = {}", tether::filter::quote(client_id));
        let owner = client_id.to_string();
        self.collection(Some(&filter), Transform::filter(move |code: &Code| code.client == owner))
            .await
    }

    pub async fn homes(&self) -> Result<CollectionSync<Home>, SyncError> {
        self.collection(None, Transform::sort_by_key(|home: &Home| home.name.clone()))
            .await
    }

    /// Newest first. Live events are held to the same view as the fetch.
    pub async fn tokens(&self, view: TokenView) -> Result<CollectionSync<Token>, SyncError> {
        let newest_first = Transform::sort_by(|a: &Token, b: &Token| b.base.created_at().cmp(&a.base.created_at()));
        let (filter, keep) = match view {
            TokenView::All => (None, Transform::identity()),
            TokenView::Account(account) => (
                Some(format!("account = {}", tether::filter::quote(&account))),
                Transform::filter(move |token: &Token| token.account == account),
            ),
            TokenView::Valid => (
                Some(format!("status = {}", tether::filter::quote(TokenStatus::Valid.as_str()))),
                Transform::filter(|token: &Token| token.status == TokenStatus::Valid),
            ),
        };
        self.collection(filter.as_deref(), keep.then(newest_first)).await
    }

    /// Requests inside `frame`, newest first, capped at the configured limit.
    pub async fn requests(&self, frame: TimeFrame) -> Result<CollectionSync<Request>, SyncError> {
        let filter = frame.filter(Utc::now());
        let newest_first =
            Transform::sort_by(|a: &Request, b: &Request| b.base.created_at().cmp(&a.base.created_at()));
        self.collection(Some(&filter), newest_first.then(Transform::take(self.config.request_limit)))
            .await
    }

    /// Requests for the frame in the URL, or the configured default.
    pub async fn requests_for_current_frame(&self) -> Result<CollectionSync<Request>, SyncError> {
        self.requests(self.time_frame()).await
    }

    pub async fn request(&self, id: &str) -> Result<SingleSync<Request>, SyncError> {
        self.single(id).await
    }

    /// Stats over a requests view, recomputed whenever it changes.
    pub fn request_stats(&self, requests: &CollectionSync<Request>) -> Observable<RequestStats> {
        requests
            .items()
            .map(|items| RequestStats::compute(items, Local::now().fixed_offset()))
    }

    /// Stops following the session and browser history.
    pub fn shutdown(&mut self) {
        self.identity.stop();
        self.navigation.stop();
        log::info!("Console shut down");
    }

    async fn collection<R: Resource>(
        &self,
        filter: Option<&str>,
        transform: Transform<R>,
    ) -> Result<CollectionSync<R>, SyncError> {
        let source = self.store.collection::<R>(R::COLLECTION);
        CollectionSync::activate(source.as_ref(), &self.spawner, filter, Some(transform)).await
    }

    async fn single<R: Resource>(&self, id: &str) -> Result<SingleSync<R>, SyncError> {
        let source = self.store.collection::<R>(R::COLLECTION);
        SingleSync::activate(source.as_ref(), &self.spawner, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};
    use futures::executor::{LocalPool, LocalSpawner};
    use tether::memory::{MemoryHistory, MemorySession, MemoryStore};

    struct Fixture {
        pool: LocalPool,
        store: MemoryStore,
        session: Rc<MemorySession<Admin>>,
        history: Rc<MemoryHistory>,
        console: Console<MemoryStore, LocalSpawner>,
    }

    fn fixture(url: &str, config: ConsoleConfig) -> Fixture {
        let pool = LocalPool::new();
        let store = MemoryStore::new();
        let session = Rc::new(MemorySession::<Admin>::new());
        let history = Rc::new(MemoryHistory::new(url));
        let console = Console::new(
            store.clone(),
            pool.spawner(),
            session.clone(),
            history.clone(),
            config,
        );
        Fixture {
            pool,
            store,
            session,
            history,
            console,
        }
    }

    fn sign_in(session: &MemorySession<Admin>) {
        session.sign_in(
            Admin {
                id: "adm1".to_string(),
                email: "admin@example.com".to_string(),
            },
            Utc::now() + Duration::hours(1),
        );
    }

    fn base(id: &str, created: DateTime<Utc>) -> Base {
        let stamp = created.format("%Y-%m-%d %H:%M:%S%.3fZ").to_string();
        Base {
            id: id.to_string(),
            created: stamp.clone(),
            updated: stamp,
        }
    }

    fn token(id: &str, account: &str, status: TokenStatus, minutes_ago: i64) -> Token {
        Token {
            base: base(id, Utc::now() - Duration::minutes(minutes_ago)),
            account: account.to_string(),
            client: "cli1".to_string(),
            status,
            access_token: String::new(),
            refresh_token: String::new(),
            expires: String::new(),
            used: String::new(),
        }
    }

    fn request(id: &str, minutes_ago: i64, status: u16) -> Request {
        Request {
            base: base(id, Utc::now() - Duration::minutes(minutes_ago)),
            token: "tok1".to_string(),
            method: "GET".to_string(),
            url: "/api/v2/me".to_string(),
            status,
        }
    }

    fn ids<R: tether::Record>(items: &im::Vector<R>) -> Vec<String> {
        items.iter().map(|item| item.id().to_string()).collect()
    }

    #[test]
    fn test_guard_redirects_and_returns_after_sign_in() {
        let f = fixture("/tokens?account=acc1", ConsoleConfig::default());

        assert_eq!(f.console.guard(), Page::Login);
        assert_eq!(f.history.location(), "/login?next=%2Ftokens%3Faccount%3Dacc1");
        assert_eq!(f.console.after_sign_in(), Page::Login);

        sign_in(&f.session);
        assert!(f.console.identity().get().signed_in());
        assert_eq!(f.console.after_sign_in(), Page::Tokens);
        assert_eq!(f.console.navigation().get_query("account"), Some("acc1".to_string()));

        assert_eq!(f.console.open(&Page::Account("acc1".to_string())), Page::Account("acc1".to_string()));
        f.session.sign_out();
        assert_eq!(f.console.guard(), Page::Login);
        assert_eq!(f.console.open(&Page::Login), Page::Login);
    }

    #[test]
    fn test_after_sign_in_ignores_foreign_targets() {
        let f = fixture("/login?next=%2F%2Fevil.example.com", ConsoleConfig::default());
        sign_in(&f.session);
        assert_eq!(f.console.after_sign_in(), Page::Dashboard);
    }

    #[test]
    fn test_accounts_sorted_by_email() {
        let mut f = fixture("/accounts", ConsoleConfig::default());
        let accounts = f.store.table::<Account>(Account::COLLECTION);
        for (id, email) in [("a1", "zed@example.com"), ("a2", "Amy@example.com")] {
            accounts
                .insert(Account {
                    base: base(id, Utc::now()),
                    tado_id: "1".to_string(),
                    email: email.to_string(),
                    password: String::new(),
                    homes: vec![],
                })
                .unwrap();
        }

        let sync = f.pool.run_until(f.console.accounts()).unwrap();
        f.pool.run_until_stalled();
        assert_eq!(ids(&sync.snapshot()), vec!["a2", "a1"]);

        let created = accounts
            .create_with(|id| Account {
                base: base(&id, Utc::now()),
                tado_id: "2".to_string(),
                email: "max@example.com".to_string(),
                password: String::new(),
                homes: vec![],
            })
            .unwrap();
        assert_eq!(sync.snapshot()[1], created);
    }

    #[test]
    fn test_token_views_hold_live_events_to_the_view() {
        let mut f = fixture("/tokens", ConsoleConfig::default());
        let tokens = f.store.table::<Token>(Token::COLLECTION);
        tokens.insert(token("t1", "acc1", TokenStatus::Valid, 30)).unwrap();
        tokens.insert(token("t2", "acc2", TokenStatus::Invalid, 20)).unwrap();
        tokens.insert(token("t3", "acc1", TokenStatus::Valid, 10)).unwrap();

        let valid = f.pool.run_until(f.console.tokens(TokenView::Valid)).unwrap();
        let mine = f
            .pool
            .run_until(f.console.tokens(TokenView::Account("acc1".to_string())))
            .unwrap();
        let all = f.pool.run_until(f.console.tokens(TokenView::All)).unwrap();
        f.pool.run_until_stalled();

        assert_eq!(ids(&valid.snapshot()), vec!["t3", "t1"]);
        assert_eq!(ids(&mine.snapshot()), vec!["t3", "t1"]);
        assert_eq!(ids(&all.snapshot()), vec!["t3", "t2", "t1"]);

        tokens.insert(token("t4", "acc2", TokenStatus::Invalid, 0)).unwrap();
        tokens.update(token("t1", "acc1", TokenStatus::Invalid, 30)).unwrap();

        assert_eq!(ids(&valid.snapshot()), vec!["t3"]);
        assert_eq!(ids(&mine.snapshot()), vec!["t3", "t1"]);
        assert_eq!(ids(&all.snapshot()), vec!["t4", "t3", "t2", "t1"]);
    }

    #[test]
    fn test_codes_for_client() {
        let mut f = fixture("/clients/cli1", ConsoleConfig::default());
        let codes = f.store.table::<Code>(Code::COLLECTION);
        let code = |id: &str, client: &str| Code {
            base: base(id, Utc::now()),
            client: client.to_string(),
            token: String::new(),
            device_code: format!("device-{id}"),
            user_code: "ABCD-EFGH".to_string(),
            verification_uri: "https://example.com/device".to_string(),
            expires: String::new(),
        };
        codes.insert(code("c1", "cli1")).unwrap();
        codes.insert(code("c2", "cli2")).unwrap();

        let sync = f.pool.run_until(f.console.codes_for_client("cli1")).unwrap();
        f.pool.run_until_stalled();
        codes.insert(code("c3", "cli2")).unwrap();
        codes.insert(code("c4", "cli1")).unwrap();

        assert_eq!(ids(&sync.snapshot()), vec!["c1", "c4"]);
    }

    #[test]
    fn test_requests_follow_the_time_frame() {
        let config = ConsoleConfig {
            request_limit: 2,
            ..ConsoleConfig::default()
        };
        let mut f = fixture("/requests", config);
        let requests = f.store.table::<Request>(Request::COLLECTION);
        requests.insert(request("r1", 30, 200)).unwrap();
        requests.insert(request("r2", 90, 500)).unwrap();
        requests.insert(request("r3", 10, 404)).unwrap();
        requests.insert(request("r4", 60 * 30, 200)).unwrap();

        assert_eq!(f.console.time_frame(), TimeFrame::Day);
        f.console.set_time_frame(TimeFrame::Hour);
        assert_eq!(f.history.location(), "/requests?frame=hour");
        assert_eq!(f.console.time_frame(), TimeFrame::Hour);

        let hour = f.pool.run_until(f.console.requests_for_current_frame()).unwrap();
        f.pool.run_until_stalled();
        assert_eq!(ids(&hour.snapshot()), vec!["r3", "r1"]);

        let day = f.pool.run_until(f.console.requests(TimeFrame::Day)).unwrap();
        f.pool.run_until_stalled();
        assert_eq!(ids(&day.snapshot()), vec!["r3", "r1"]);

        let stats = f.console.request_stats(&day);
        assert_eq!(stats.get().total, 2);
        requests.insert(request("r5", 0, 201)).unwrap();
        assert_eq!(ids(&day.snapshot()), vec!["r5", "r3"]);
        assert_eq!(stats.get().last_hour, 2);
        assert_eq!(stats.get().statuses.client_error, 1);
    }

    #[test]
    fn test_unknown_frame_falls_back_to_config() {
        let config = ConsoleConfig {
            default_time_frame: TimeFrame::Week,
            ..ConsoleConfig::default()
        };
        let f = fixture("/requests?frame=forever", config);
        assert_eq!(f.console.time_frame(), TimeFrame::Week);
    }

    #[test]
    fn test_single_views_and_shutdown() {
        let mut f = fixture("/clients/cli1", ConsoleConfig::default());
        let clients = f.store.table::<Client>(Client::COLLECTION);
        clients
            .insert(Client {
                base: base("cli1", Utc::now()),
                client_id: "tado-web-app".to_string(),
                redirect_uri: String::new(),
                scope: "home.user".to_string(),
                name: "Web".to_string(),
                kind: ClientType::PasswordGrant,
            })
            .unwrap();

        let Page::Client(id) = f.console.page() else {
            panic!("expected a client page");
        };
        let client = f.pool.run_until(f.console.client(&id)).unwrap();
        let missing = f.pool.run_until(f.console.request("nope")).unwrap();
        f.pool.run_until_stalled();

        assert_eq!(client.snapshot().map(|c| c.name), Some("Web".to_string()));
        assert!(matches!(
            missing.fetch().status(),
            tether::FetchStatus::Failed(SyncError::NotFound { .. })
        ));

        f.console.shutdown();
        sign_in(&f.session);
        assert!(!f.console.identity().get().signed_in());
    }
}
