//! End-to-end site lifecycle against in-memory fakes
//!
//! A fake pod interprets the generated shell statements and tracks the
//! directories, databases and vhost files they would create, so create/delete
//! symmetry can be checked on the resulting state rather than on strings.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::controller::Action;
use kube::ResourceExt;

use multisite::controller::{error_policy, reconcile, Context, KubeClient};
use multisite::crd::{MultiSite, MultiSiteSpec, SiteStatus};
use multisite::dns::{a_record_patch, DnsClient, DEFAULT_TTL};
use multisite::exec::{ExecResult, PodTarget, RemoteExecutor};
use multisite::ingress::{build_ingress, IngressAction, IngressManager, DEFAULT_TLS_SECRET};
use multisite::retry::RetryConfig;
use multisite::site::{
    DnsName, HostSuffix, SiteDescriptor, SiteLayout, SiteLifecycleManager, SiteSettings,
    WordpressProfile,
};
use multisite::Error;

const MARKER: &str = "; echo exec_code=$?";

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct PodState {
    dirs: BTreeSet<String>,
    databases: BTreeSet<String>,
    files: BTreeSet<String>,
}

/// Shared pod that interprets the statements the workflows send
#[derive(Default)]
struct FakePod {
    state: Mutex<PodState>,
    fail_on: Option<(&'static str, &'static str)>,
}

impl FakePod {
    fn failing_on(needle: &'static str, stderr: &'static str) -> Self {
        let pod = Self {
            fail_on: Some((needle, stderr)),
            ..Default::default()
        };
        pod.seed();
        pod
    }

    fn with_template() -> Self {
        let pod = Self::default();
        pod.seed();
        pod
    }

    fn seed(&self) {
        let mut state = self.state.lock().unwrap();
        state.dirs.insert("/usr/src/wordpress".to_string());
        state.files.insert("/config/000-default.conf".to_string());
    }

    fn has_dir(&self, dir: &str) -> bool {
        self.state.lock().unwrap().dirs.contains(dir)
    }

    fn has_database(&self, db: &str) -> bool {
        self.state.lock().unwrap().databases.contains(db)
    }

    fn has_file(&self, file: &str) -> bool {
        self.state.lock().unwrap().files.contains(file)
    }

    fn has_artifacts_for(&self, nickname: &str) -> bool {
        self.has_dir(&format!("/cloudclusters/wordpress/{nickname}"))
            || self.has_database(nickname)
            || self.has_file(&format!("/cloudclusters/config/apache/{nickname}.conf"))
    }

    /// Run one statement, returning its exit code and stderr
    fn run(&self, statement: &str) -> (i32, String) {
        if let Some((needle, stderr)) = self.fail_on {
            if statement.contains(needle) {
                return (1, stderr.to_string());
            }
        }

        let mut state = self.state.lock().unwrap();
        if let Some(dir) = between(statement, "if [ -d \"", "\" ]") {
            state.dirs.remove(dir);
            return (0, String::new());
        }
        if let Some(file) = between(statement, "if [ -f \"", "\" ]") {
            if statement.contains("then rm -f ") {
                state.files.remove(file);
            }
            return (0, String::new());
        }
        if let Some(rest) = statement.strip_prefix("cp -rp ") {
            let mut parts = rest.split_whitespace();
            let (src, dst) = (parts.next().unwrap_or(""), parts.next().unwrap_or(""));
            if !state.dirs.contains(src) {
                return (1, format!("cp: cannot stat '{src}': No such file or directory"));
            }
            state.dirs.insert(dst.to_string());
            return (0, String::new());
        }
        if let Some(rest) = statement.strip_prefix("cp ") {
            let mut parts = rest.split_whitespace();
            let (src, dst) = (parts.next().unwrap_or(""), parts.next().unwrap_or(""));
            if !state.files.contains(src) {
                return (1, format!("cp: cannot stat '{src}': No such file or directory"));
            }
            state.files.insert(dst.to_string());
            return (0, String::new());
        }
        if statement.starts_with("sed -i ") {
            let file = statement.rsplit(' ').next().unwrap_or("");
            if !state.files.contains(file) {
                return (2, format!("sed: can't read {file}: No such file or directory"));
            }
            return (0, String::new());
        }
        if let Some(db) = between(statement, "create database if not exists ", "\"") {
            state.databases.insert(db.to_string());
            return (0, String::new());
        }
        if let Some(db) = between(statement, "drop database if exists ", ";") {
            state.databases.remove(db);
            return (0, String::new());
        }
        if statement.contains("select count(*)")
            || statement.contains(" -e \"grant ")
            || statement.contains("flush privileges")
            || statement.starts_with("supervisorctl restart ")
        {
            return (0, String::new());
        }
        if let Some(dir) = between(statement, "--path=", "/ ").or_else(|| {
            statement
                .rsplit("--path=")
                .next()
                .map(|p| p.trim_end_matches('/'))
        }) {
            if statement.starts_with("gosu www-data wp ") {
                return if state.dirs.contains(dir) {
                    (0, String::new())
                } else {
                    (1, format!("Error: This does not seem to be a WordPress installation: {dir}"))
                };
            }
        }
        (127, format!("bash: unexpected statement: {statement}"))
    }
}

fn between<'a>(haystack: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = haystack.find(start)? + start.len();
    let len = haystack[from..].find(end)?;
    Some(&haystack[from..from + len])
}

#[async_trait]
impl RemoteExecutor for FakePod {
    async fn execute(&self, target: &PodTarget, command: &str) -> ExecResult {
        assert_eq!(target.to_string(), "acme/acme-cms-0:wordpress");

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        for statement in command.split(MARKER) {
            let statement = statement.trim_start_matches("; ").trim();
            if statement.is_empty() {
                continue;
            }
            let (code, err) = self.run(statement);
            stdout.push(format!("exec_code={code}"));
            if !err.is_empty() {
                stderr.push(err);
            }
        }
        ExecResult::completed(stdout.join("\n"), stderr.join("\n"))
    }
}

/// API server holding a single MultiSite
struct FakeKube {
    object: Mutex<Option<MultiSite>>,
    writes: Mutex<u32>,
}

impl FakeKube {
    fn new(site: MultiSite) -> Self {
        Self {
            object: Mutex::new(Some(site)),
            writes: Mutex::new(0),
        }
    }

    fn current(&self) -> Option<MultiSite> {
        self.object.lock().unwrap().clone()
    }

    fn request_deletion(&self) {
        if let Some(site) = self.object.lock().unwrap().as_mut() {
            site.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        }
    }

    fn writes(&self) -> u32 {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn get_site(&self, namespace: &str, name: &str) -> Result<Option<MultiSite>, Error> {
        Ok(self
            .current()
            .filter(|s| s.namespace().as_deref() == Some(namespace) && s.name_any() == name))
    }

    async fn persist_site(&self, site: &MultiSite) -> Result<(), Error> {
        *self.writes.lock().unwrap() += 1;
        let mut object = self.object.lock().unwrap();
        let Some(stored) = object.as_mut() else {
            return Err(Error::persistence("multisites \"blog\" not found"));
        };
        stored.spec.status = site.spec.status;
        stored.spec.error_msg = site.spec.error_msg.clone();
        stored.metadata.finalizers = site.metadata.finalizers.clone();

        // The API server removes a deleting object once its finalizers are gone
        let released = stored.metadata.deletion_timestamp.is_some()
            && stored.finalizers().is_empty();
        if released {
            *object = None;
        }
        Ok(())
    }
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::from(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

/// Ingress API keyed by name
struct FakeIngressApi {
    domain: DnsName,
    objects: Mutex<BTreeMap<String, Ingress>>,
    fail_delete: bool,
}

impl FakeIngressApi {
    fn new() -> Self {
        Self {
            domain: public_domain(),
            objects: Mutex::new(BTreeMap::new()),
            fail_delete: false,
        }
    }

    fn get(&self, name: &str) -> Option<Ingress> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl IngressManager for FakeIngressApi {
    async fn apply(&self, site: &SiteDescriptor, action: IngressAction) -> Result<(), Error> {
        let name = site.site_label();
        let mut objects = self.objects.lock().unwrap();
        match action {
            IngressAction::Create => {
                if objects.contains_key(&name) {
                    return Err(api_error(
                        409,
                        "AlreadyExists",
                        format!("ingresses.networking.k8s.io \"{name}\" already exists"),
                    ));
                }
                objects.insert(name, build_ingress(site, &self.domain, DEFAULT_TLS_SECRET));
                Ok(())
            }
            IngressAction::Delete => {
                if self.fail_delete {
                    return Err(api_error(
                        500,
                        "InternalError",
                        "etcdserver: leader changed".to_string(),
                    ));
                }
                match objects.remove(&name) {
                    Some(_) => Ok(()),
                    None => Err(api_error(
                        404,
                        "NotFound",
                        format!("ingresses.networking.k8s.io \"{name}\" not found"),
                    )),
                }
            }
        }
    }
}

/// DNS API recording every PATCH body it receives
#[derive(Default)]
struct FakeDnsApi {
    bodies: Mutex<Vec<String>>,
}

impl FakeDnsApi {
    fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl DnsClient for FakeDnsApi {
    async fn upsert_a_record(&self, hostname: &str, ip: IpAddr) -> Result<(), Error> {
        let body = serde_json::to_string_pretty(&a_record_patch(hostname, ip, DEFAULT_TTL))
            .map_err(|e| Error::dns(e.to_string()))?;
        self.bodies.lock().unwrap().push(body);
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn public_domain() -> DnsName {
    DnsName::parse("tripanels.com").unwrap()
}

fn acme_blog() -> MultiSite {
    let mut site = MultiSite::new(
        "blog",
        MultiSiteSpec {
            pod_name: "acme-cms-0".to_string(),
            container_name: "wordpress".to_string(),
            nick_name: "blog".to_string(),
            ip: "203.0.113.5".to_string(),
            status: SiteStatus::Init,
            error_msg: None,
        },
    );
    site.metadata.namespace = Some("acme".to_string());
    site
}

struct Harness {
    kube: Arc<FakeKube>,
    pod: Arc<FakePod>,
    ingress: Arc<FakeIngressApi>,
    dns: Arc<FakeDnsApi>,
    ctx: Arc<Context>,
}

impl Harness {
    fn new(pod: FakePod, ingress: FakeIngressApi) -> Self {
        let kube = Arc::new(FakeKube::new(acme_blog()));
        let pod = Arc::new(pod);
        let ingress = Arc::new(ingress);
        let dns = Arc::new(FakeDnsApi::default());

        let settings = SiteSettings {
            layout: SiteLayout::default(),
            wordpress: WordpressProfile::default(),
            cluster_suffix: HostSuffix::PodHostname,
            public_domain: public_domain(),
        };
        let lifecycle = SiteLifecycleManager::new(
            pod.clone(),
            ingress.clone(),
            dns.clone(),
            settings,
        );
        let ctx = Arc::new(Context::new(
            kube.clone(),
            Arc::new(lifecycle),
            Duration::from_secs(600),
            RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_multiplier: 2.0,
            },
        ));

        Self {
            kube,
            pod,
            ingress,
            dns,
            ctx,
        }
    }

    async fn reconcile(&self) -> Result<Action, Error> {
        let observed = self.kube.current().unwrap_or_else(acme_blog);
        reconcile(Arc::new(observed), self.ctx.clone()).await
    }
}

// =============================================================================
// Stories
// =============================================================================

/// Story: A site goes from Init to serving, then is torn down without a trace
#[tokio::test]
async fn story_create_then_delete_leaves_no_site_artifacts() {
    let h = Harness::new(FakePod::with_template(), FakeIngressApi::new());

    let action = h.reconcile().await.expect("creation reconcile");
    assert_eq!(action, Action::await_change());

    let site = h.kube.current().expect("object still present");
    assert_eq!(site.spec.status, SiteStatus::Success);
    assert_eq!(site.spec.error_msg, None);
    assert!(site.has_finalizer());

    assert!(h.pod.has_dir("/cloudclusters/wordpress/blog"));
    assert!(h.pod.has_database("blog"));
    assert!(h.pod.has_file("/cloudclusters/config/apache/blog.conf"));

    let ingress = h.ingress.get("acme-blog").expect("ingress created");
    let host = ingress
        .spec
        .and_then(|s| s.rules)
        .and_then(|r| r.into_iter().next())
        .and_then(|r| r.host);
    assert_eq!(host.as_deref(), Some("acme-blog.tripanels.com"));

    let bodies = h.dns.bodies();
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].contains(r#""name": "acme-blog.tripanels.com.""#));
    assert!(bodies[0].contains(r#""content": "203.0.113.5""#));

    // A repeated notification must not provision again
    h.reconcile().await.expect("idle reconcile");
    assert_eq!(h.dns.bodies().len(), 1);

    h.kube.request_deletion();
    h.reconcile().await.expect("teardown reconcile");

    assert!(!h.pod.has_artifacts_for("blog"));
    assert!(h.ingress.is_empty());
    assert!(h.kube.current().is_none(), "object released after teardown");
    assert_eq!(h.dns.bodies().len(), 1, "teardown leaves DNS alone");
}

/// Story: A failing ingress deletion keeps the finalizer so teardown is retried
#[tokio::test]
async fn story_failed_ingress_deletion_keeps_finalizer() {
    let mut ingress = FakeIngressApi::new();
    ingress.fail_delete = true;
    let h = Harness::new(FakePod::with_template(), ingress);

    h.reconcile().await.expect("creation reconcile");
    let writes_after_create = h.kube.writes();

    h.kube.request_deletion();
    let err = h.reconcile().await.expect_err("teardown should fail");
    assert!(err.to_string().contains("leader changed"));

    let site = h.kube.current().expect("object kept alive");
    assert!(site.has_finalizer());
    assert_eq!(h.kube.writes(), writes_after_create);
    assert_eq!(
        error_policy(Arc::new(site), &err, h.ctx.clone()),
        Action::requeue(Duration::from_secs(600))
    );
}

/// Story: A database failure is recorded and nothing is published
#[tokio::test]
async fn story_database_failure_blocks_ingress_and_dns() {
    let pod = FakePod::failing_on(
        "create database",
        "ERROR 2002 (HY000): Can't connect to local MySQL server through socket",
    );
    let h = Harness::new(pod, FakeIngressApi::new());

    h.reconcile().await.expect("a failed creation still completes the reconcile");

    let site = h.kube.current().expect("object present");
    assert_eq!(site.spec.status, SiteStatus::Failed);
    assert_eq!(
        site.spec.error_msg.as_deref(),
        Some("ERROR 2002 (HY000): Can't connect to local MySQL server through socket")
    );
    assert!(site.has_finalizer(), "the copied site tree still needs cleanup");
    assert!(h.ingress.is_empty());
    assert!(h.dns.bodies().is_empty());

    // No rollback: the first step's output is still there
    assert!(h.pod.has_dir("/cloudclusters/wordpress/blog"));

    // Failed is terminal for the create path
    h.reconcile().await.expect("idle reconcile");
    assert!(h.ingress.is_empty());

    // Deleting the failed site cleans up the partial state
    h.kube.request_deletion();
    h.reconcile().await.expect("teardown of a partial site");
    assert!(!h.pod.has_artifacts_for("blog"));
    assert!(h.kube.current().is_none());
}

/// Story: Creating over an existing ingress fails with the API's own message
#[tokio::test]
async fn story_existing_ingress_fails_creation() {
    let h = Harness::new(FakePod::with_template(), FakeIngressApi::new());
    let descriptor = SiteDescriptor::from_resource(&acme_blog()).unwrap();
    h.ingress
        .apply(&descriptor, IngressAction::Create)
        .await
        .expect("pre-existing ingress");

    h.reconcile().await.expect("reconcile");

    let site = h.kube.current().expect("object present");
    assert_eq!(site.spec.status, SiteStatus::Failed);
    assert!(site
        .spec
        .error_msg
        .as_deref()
        .is_some_and(|m| m.contains("already exists")));
    assert!(h.dns.bodies().is_empty());
}
