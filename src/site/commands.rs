//! Shell scripts for each workflow step
//!
//! Only validated values reach these builders: [`Nickname`] and
//! [`TenantNamespace`] through the descriptor, paths and names through
//! [`SiteLayout::validate`] and [`WordpressProfile::validate`]. The
//! `${...}` references are expanded by the remote shell from the container
//! environment; their values never pass through the operator.
//!
//! [`Nickname`]: super::Nickname
//! [`TenantNamespace`]: super::TenantNamespace

use crate::exec::ShellScript;
use crate::Error;

use super::descriptor::{DnsName, SiteDescriptor};

/// mysql invocation over the local socket as root
const MYSQL_ROOT: &str = "mysql --protocol=socket -uroot -p${MYSQL_ROOT_PASSWORD}";

/// Filesystem layout of the shared hosting image
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteLayout {
    /// Pristine WordPress tree copied for every new site
    pub template_dir: String,
    /// Parent directory of per-site trees
    pub site_root: String,
    /// Vhost template containing [`Self::vhost_placeholder`]
    pub vhost_template: String,
    /// Directory the front-end server loads vhost files from
    pub vhost_dir: String,
    /// Token in the vhost template replaced by the nickname
    pub vhost_placeholder: String,
    /// PHP snippet appended to wp-config.php
    pub extra_php: String,
    /// Database host written into wp-config.php
    pub db_host: String,
    /// Unix user wp-cli runs as
    pub web_user: String,
    /// supervisord program name of the front-end server
    pub web_service: String,
}

impl Default for SiteLayout {
    fn default() -> Self {
        Self {
            template_dir: "/usr/src/wordpress".to_string(),
            site_root: "/cloudclusters/wordpress".to_string(),
            vhost_template: "/config/000-default.conf".to_string(),
            vhost_dir: "/cloudclusters/config/apache".to_string(),
            vhost_placeholder: "default_site".to_string(),
            extra_php: "/usr/bin/wphttps.php".to_string(),
            db_host: "127.0.0.1".to_string(),
            web_user: "www-data".to_string(),
            web_service: "apache".to_string(),
        }
    }
}

impl SiteLayout {
    /// Check every value against the allow-lists used for interpolation
    pub fn validate(&self) -> Result<(), Error> {
        for (field, path) in [
            ("templateDir", &self.template_dir),
            ("siteRoot", &self.site_root),
            ("vhostTemplate", &self.vhost_template),
            ("vhostDir", &self.vhost_dir),
            ("extraPhp", &self.extra_php),
        ] {
            validate_path(field, path)?;
        }
        for (field, word) in [
            ("vhostPlaceholder", &self.vhost_placeholder),
            ("dbHost", &self.db_host),
            ("webUser", &self.web_user),
            ("webService", &self.web_service),
        ] {
            validate_word(field, word)?;
        }
        Ok(())
    }

    /// Per-site document root
    pub fn site_dir(&self, site: &SiteDescriptor) -> String {
        format!("{}/{}", self.site_root.trim_end_matches('/'), site.nickname)
    }

    /// Per-site vhost file
    pub fn vhost_file(&self, site: &SiteDescriptor) -> String {
        format!(
            "{}/{}.conf",
            self.vhost_dir.trim_end_matches('/'),
            site.nickname
        )
    }
}

/// Theme and plugins installed on every new site
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WordpressProfile {
    /// Theme slug activated after install
    pub theme: String,
    /// Plugins installed and activated, by name
    pub plugins: Vec<String>,
}

impl Default for WordpressProfile {
    fn default() -> Self {
        Self {
            theme: "twentyseventeen".to_string(),
            plugins: vec![
                "WP Super Cache".to_string(),
                "All-in-One WP Migration".to_string(),
            ],
        }
    }
}

impl WordpressProfile {
    /// Check theme and plugin names before they are quoted into commands
    pub fn validate(&self) -> Result<(), Error> {
        validate_word("theme", &self.theme)?;
        for plugin in &self.plugins {
            let ok = !plugin.is_empty()
                && plugin
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'));
            if !ok {
                return Err(Error::validation(format!(
                    "plugin name '{}' contains unsupported characters",
                    plugin
                )));
            }
        }
        Ok(())
    }
}

/// Domain suffix used in the site URL and the vhost ServerName
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostSuffix {
    /// A fixed, validated domain
    Fixed(DnsName),
    /// Fields 5-6 of the pod's FQDN, resolved by the remote shell
    PodHostname,
}

impl HostSuffix {
    fn render(&self) -> String {
        match self {
            HostSuffix::Fixed(name) => name.to_string(),
            HostSuffix::PodHostname => "$(hostname -f | cut -f 5-6 -d .)".to_string(),
        }
    }
}

/// Builds the scripts for one site
pub struct SiteCommands<'a> {
    site: &'a SiteDescriptor,
    layout: &'a SiteLayout,
    wordpress: &'a WordpressProfile,
    suffix: &'a HostSuffix,
}

impl<'a> SiteCommands<'a> {
    /// Create a builder for `site`
    pub fn new(
        site: &'a SiteDescriptor,
        layout: &'a SiteLayout,
        wordpress: &'a WordpressProfile,
        suffix: &'a HostSuffix,
    ) -> Self {
        Self {
            site,
            layout,
            wordpress,
            suffix,
        }
    }

    /// Hostname as seen by the web server, `{ns}-{nick}.{suffix}`
    fn server_name(&self) -> String {
        format!("{}.{}", self.site.site_label(), self.suffix.render())
    }

    fn wp(&self, args: &str) -> String {
        format!(
            "gosu {} wp {} --path={}/",
            self.layout.web_user,
            args,
            self.layout.site_dir(self.site)
        )
    }

    /// Copy the template tree into the site directory
    pub fn copy_template(&self) -> ShellScript {
        ShellScript::new().statement(format!(
            "cp -rp {} {}",
            self.layout.template_dir,
            self.layout.site_dir(self.site)
        ))
    }

    /// Create the database and grant the shared user access to it
    pub fn create_database(&self) -> ShellScript {
        let db = &self.site.nickname;
        ShellScript::new()
            .statement(format!(
                "{MYSQL_ROOT} -e \"create database if not exists {db}\""
            ))
            .statement(format!(
                "{MYSQL_ROOT} -e \"grant all on {db}.* to '${{MYSQL_USER}}'@'%'\""
            ))
            .statement(format!("{MYSQL_ROOT} -e \"flush privileges;\""))
    }

    /// Write wp-config.php, install core, activate theme and plugins
    pub fn init_site(&self) -> ShellScript {
        let db = &self.site.nickname;
        let mut script = ShellScript::new()
            .statement(format!(
                "gosu {} wp --path={}/ config create --dbuser=${{MYSQL_USER}} --dbpass=${{MYSQL_PASSWORD}} --dbname={} --dbhost={} --extra-php < {}",
                self.layout.web_user,
                self.layout.site_dir(self.site),
                db,
                self.layout.db_host,
                self.layout.extra_php
            ))
            .statement(self.wp(&format!(
                "core install --url=\"https://{}\" --title=\"${{WP_TITLE}}\" --admin_user=\"${{WP_USER}}\" --admin_password=\"${{WP_PASSWORD}}\" --admin_email=\"${{WP_EMAIL}}\"",
                self.server_name()
            )))
            .statement(self.wp(&format!("theme activate {}", self.wordpress.theme)));

        for plugin in &self.wordpress.plugins {
            script = script.statement(self.wp(&format!("plugin install \"{}\" --activate", plugin)));
        }
        script
    }

    /// Materialize the vhost file from the template
    pub fn set_vhost(&self) -> ShellScript {
        let file = self.layout.vhost_file(self.site);
        ShellScript::new()
            .statement(format!("cp {} {}", self.layout.vhost_template, file))
            .statement(format!(
                "sed -i \"s/{}/{}/g\" {}",
                self.layout.vhost_placeholder, self.site.nickname, file
            ))
    }

    /// Insert `ServerName` before the `DocumentRoot` directive
    pub fn add_server_name(&self) -> ShellScript {
        ShellScript::new().statement(format!(
            "sed -i \"/DocumentRoot/i \\        ServerName {}\" {}",
            self.server_name(),
            self.layout.vhost_file(self.site)
        ))
    }

    /// Restart the front-end server so the vhost is loaded
    pub fn restart_web_server(&self) -> ShellScript {
        ShellScript::new().statement(format!(
            "supervisorctl restart {}",
            self.layout.web_service
        ))
    }

    /// Drop the database and revoke the shared user's grants.
    ///
    /// The revoke only runs while a grant row exists, so a retried teardown
    /// does not fail on an already revoked grant.
    pub fn drop_database(&self) -> ShellScript {
        let db = &self.site.nickname;
        ShellScript::new()
            .statement(format!(
                "{MYSQL_ROOT} -e \"drop database if exists {db};\""
            ))
            .statement(format!(
                "{MYSQL_ROOT} -N -e \"select count(*) from mysql.db where Db='{db}' and User='${{MYSQL_USER}}'\" | grep -qx 0 || {MYSQL_ROOT} -e \"revoke all on {db}.* from '${{MYSQL_USER}}'@'%';\""
            ))
    }

    /// Remove the site directory if present
    pub fn remove_site_dir(&self) -> ShellScript {
        let dir = self.layout.site_dir(self.site);
        ShellScript::new().statement(format!(
            "if [ -d \"{dir}\" ]; then rm -fr {dir}; fi"
        ))
    }

    /// Remove vhost lines naming the site if the vhost file exists
    pub fn remove_server_name(&self) -> ShellScript {
        let file = self.layout.vhost_file(self.site);
        ShellScript::new().statement(format!(
            "if [ -f \"{file}\" ]; then sed -i \"/{}/d\" {file}; fi",
            self.site.site_label()
        ))
    }

    /// Remove the vhost file if present
    pub fn remove_vhost(&self) -> ShellScript {
        let file = self.layout.vhost_file(self.site);
        ShellScript::new().statement(format!(
            "if [ -f \"{file}\" ]; then rm -f {file}; fi"
        ))
    }
}

/// Absolute path made of `[A-Za-z0-9/._-]` without `..` segments
fn validate_path(field: &str, path: &str) -> Result<(), Error> {
    let ok = path.starts_with('/')
        && path.len() > 1
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'))
        && !path.split('/').any(|segment| segment == "..");
    if ok {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "{} '{}' is not an allowed absolute path",
            field, path
        )))
    }
}

/// Single shell word made of `[A-Za-z0-9._-]`
fn validate_word(field: &str, word: &str) -> Result<(), Error> {
    let ok = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "{} '{}' contains unsupported characters",
            field, word
        )))
    }
}
