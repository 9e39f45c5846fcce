//! Authentication section and the registry of pluggable auth methods.
//!
//! An auth method is registered once, under a unique name, with a prototype
//! of its options type. The prototype supplies both the option defaults and
//! the shape loosely-typed configuration values are coerced into. During
//! validation each configured `[..auth.methods.<name>]` table is replaced by
//! a concrete options value of the registered type.

use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    fmt,
};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Deserializer, Serialize, Serializer, de::DeserializeOwned},
    tracing::debug,
};

use crate::{
    coerce::{coerce_into, to_table},
    error::{Error, Messages, Result},
    sections::normalize_path,
    validate::{Validate, ValidationContext},
};

// ── Options ─────────────────────────────────────────────────────────────────

/// Object-safe view of an auth method's options type.
///
/// Implemented for every type that validates itself and round-trips through
/// serde; method crates never implement it by hand.
pub trait AuthOptions: Any + fmt::Debug + Send + Sync {
    fn validate_options(&mut self, cx: &ValidationContext<'_>) -> Result<()>;
    fn clone_box(&self) -> Box<dyn AuthOptions>;
    fn to_toml(&self) -> Result<toml::Value>;
    fn as_any(&self) -> &dyn Any;
    fn options_type_name(&self) -> &'static str;
}

impl<T> AuthOptions for T
where
    T: Validate + Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static,
{
    fn validate_options(&mut self, cx: &ValidationContext<'_>) -> Result<()> {
        self.validate(cx)
    }

    fn clone_box(&self) -> Box<dyn AuthOptions> {
        Box::new(self.clone())
    }

    fn to_toml(&self) -> Result<toml::Value> {
        Ok(toml::Value::try_from(self)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn options_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Options of one configured method, before and after materialization.
#[derive(Debug, Default)]
pub enum MethodOptions {
    /// Nothing was written; the registered defaults apply.
    #[default]
    Unset,
    /// As decoded from the file.
    Raw(toml::Value),
    /// Concrete options of the registered type.
    Resolved(Box<dyn AuthOptions>),
}

impl MethodOptions {
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }
}

impl Clone for MethodOptions {
    fn clone(&self) -> Self {
        match self {
            Self::Unset => Self::Unset,
            Self::Raw(v) => Self::Raw(v.clone()),
            Self::Resolved(o) => Self::Resolved(o.clone_box()),
        }
    }
}

impl<'de> Deserialize<'de> for MethodOptions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match Option::<toml::Value>::deserialize(deserializer)? {
            None => Self::Unset,
            Some(v) => Self::Raw(v),
        })
    }
}

impl Serialize for MethodOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Unset => toml::Table::new().serialize(serializer),
            Self::Raw(v) => v.serialize(serializer),
            Self::Resolved(o) => o
                .to_toml()
                .map_err(serde::ser::Error::custom)?
                .serialize(serializer),
        }
    }
}

/// One entry under `methods`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthMethod {
    pub enabled: bool,
    pub score: i64,
    #[serde(skip_serializing_if = "MethodOptions::is_unset")]
    pub options: MethodOptions,
}

impl AuthMethod {
    /// The materialized options, if they are of type `T`.
    pub fn options<T: Any>(&self) -> Option<&T> {
        match &self.options {
            MethodOptions::Resolved(o) => o.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

type Materializer = Box<dyn Fn(&MethodOptions) -> Result<Box<dyn AuthOptions>> + Send + Sync>;

struct RegisteredMethod {
    type_name: &'static str,
    materialize: Materializer,
}

/// Append-only table of known auth methods.
#[derive(Default)]
pub struct AuthMethodRegistry {
    methods: HashMap<String, RegisteredMethod>,
}

impl AuthMethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `prototype` as the options shape and defaults of method `name`.
    ///
    /// A name can be registered once; later attempts fail and leave the first
    /// registration in place.
    pub fn register<O>(&mut self, name: impl Into<String>, prototype: O) -> Result<()>
    where
        O: Validate + Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static,
    {
        let name = name.into();
        if self.methods.contains_key(&name) {
            return Err(Error::DuplicateAuthMethod(name));
        }
        to_table(&prototype).map_err(|e| Error::Registry(format!("method \"{name}\": {e}")))?;

        let type_name = std::any::type_name::<O>();
        let materialize: Materializer = Box::new(
            move |options: &MethodOptions| -> Result<Box<dyn AuthOptions>> {
                match options {
                    MethodOptions::Unset => Ok(Box::new(prototype.clone())),
                    MethodOptions::Raw(toml::Value::Table(fragment)) => {
                        Ok(Box::new(coerce_into(&prototype, fragment)?))
                    },
                    MethodOptions::Raw(other) => Err(Error::Registry(format!(
                        "options are {}, expected a table",
                        other.type_str()
                    ))),
                    MethodOptions::Resolved(current) if current.as_any().is::<O>() => {
                        Ok(current.clone_box())
                    },
                    MethodOptions::Resolved(current) => Err(Error::Registry(format!(
                        "converted options are \"{}\", expected \"{type_name}\"",
                        current.options_type_name()
                    ))),
                }
            },
        );

        debug!(method = %name, options = type_name, "auth method registered");
        self.methods.insert(name, RegisteredMethod {
            type_name,
            materialize,
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Replace `method.options` with concrete options of the registered type
    /// and, when the method is enabled, validate them.
    pub fn resolve(
        &self,
        name: &str,
        method: &mut AuthMethod,
        cx: &ValidationContext<'_>,
    ) -> Result<()> {
        let registered = self
            .methods
            .get(name)
            .ok_or_else(|| Error::Registry(format!("unknown auth method \"{name}\"")))?;

        let mut options = (registered.materialize)(&method.options)?;
        let outcome = if method.enabled {
            options.validate_options(cx)
        } else {
            Ok(())
        };
        method.options = MethodOptions::Resolved(options);

        debug!(
            method = name,
            options = registered.type_name,
            enabled = method.enabled,
            ok = outcome.is_ok(),
            "auth method options resolved"
        );
        outcome
    }
}

impl fmt::Debug for AuthMethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMethodRegistry")
            .field("methods", &self.names())
            .finish()
    }
}

// ── Auth section ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct User {
    pub password: Secret<String>,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Auth {
    /// Access rules as written: path to a list of user or group names, a
    /// leading `!` denies.
    #[serde(rename = "endpoints")]
    pub endpoint_rules: BTreeMap<String, Vec<String>>,

    /// `"name@group1,group2" = "password"` entries as written.
    #[serde(rename = "users", serialize_with = "serialize_passwords")]
    pub user_entries: BTreeMap<String, Secret<String>>,

    pub methods: BTreeMap<String, AuthMethod>,

    /// Normalized path to `name -> allowed`, built by validation.
    #[serde(skip)]
    pub endpoints: BTreeMap<String, BTreeMap<String, bool>>,

    /// Users keyed by bare name, built by validation.
    #[serde(skip)]
    pub users: BTreeMap<String, User>,
}

impl Auth {
    /// Enabled methods, highest score first.
    pub fn enabled_methods(&self) -> Vec<(&str, &AuthMethod)> {
        let mut enabled: Vec<_> = self
            .methods
            .iter()
            .filter(|(_, m)| m.enabled)
            .map(|(n, m)| (n.as_str(), m))
            .collect();
        enabled.sort_by(|a, b| b.1.score.cmp(&a.1.score).then(a.0.cmp(b.0)));
        enabled
    }
}

impl Validate for Auth {
    fn validate(&mut self, cx: &ValidationContext<'_>) -> Result<()> {
        let mut problems = Messages::new();

        self.endpoints = endpoint_rules(&self.endpoint_rules);

        self.users.clear();
        for (key, password) in &self.user_entries {
            let key = key.trim();
            if key.is_empty() {
                problems.push("empty user name");
                continue;
            }

            let (name, groups) = match key.split_once('@') {
                Some((name, groups)) => (name.trim(), groups.split(',').map(str::trim).collect()),
                None => (key, Vec::new()),
            };
            if name.is_empty() {
                problems.push(format!("empty user name in \"{key}\""));
                continue;
            }
            if groups.iter().any(|g| g.is_empty()) {
                problems.push(format!("empty group for user \"{name}\""));
            }

            self.users.insert(name.to_string(), User {
                password: password.clone(),
                groups: groups
                    .into_iter()
                    .filter(|g| !g.is_empty())
                    .map(str::to_string)
                    .collect(),
            });
        }

        for (name, method) in &mut self.methods {
            if !cx.auth_methods.contains(name) {
                problems.push(format!("unknown auth method \"{name}\""));
                continue;
            }
            if let Err(e) = cx.auth_methods.resolve(name, method, cx) {
                problems.extend_prefixed(name, Messages::from(e));
            }
        }

        problems.into_result(Error::Validation)
    }

    fn section_name(&self) -> std::borrow::Cow<'static, str> {
        "auth".into()
    }
}

fn endpoint_rules(
    rules: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, BTreeMap<String, bool>> {
    rules
        .iter()
        .map(|(path, names)| {
            let entries = names
                .iter()
                .filter_map(|raw| {
                    let raw = raw.trim();
                    let (name, allow) = match raw.strip_prefix('!') {
                        Some(rest) => (rest.trim(), false),
                        None => (raw, true),
                    };
                    (!name.is_empty()).then(|| (name.to_string(), allow))
                })
                .collect();
            (normalize_path(path), entries)
        })
        .collect()
}

fn serialize_passwords<S: Serializer>(
    users: &BTreeMap<String, Secret<String>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;

    let mut map = serializer.serialize_map(Some(users.len()))?;
    for (name, password) in users {
        map.serialize_entry(name, password.expose_secret())?;
    }
    map.end()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, strata_common::AppInfo};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct JwtOptions {
        secret: String,
        lifetime: i64,
        #[serde(skip)]
        checked: usize,
    }

    impl Validate for JwtOptions {
        fn validate(&mut self, _cx: &ValidationContext<'_>) -> Result<()> {
            self.checked += 1;
            if self.secret.is_empty() {
                return Err(Error::message("secret is empty"));
            }
            Ok(())
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct BasicOptions {}

    impl Validate for BasicOptions {
        fn validate(&mut self, _cx: &ValidationContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Scalar(i64);

    impl Validate for Scalar {
        fn validate(&mut self, _cx: &ValidationContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    fn registry() -> AuthMethodRegistry {
        let mut r = AuthMethodRegistry::new();
        r.register("jwt", JwtOptions {
            lifetime: 3600,
            ..JwtOptions::default()
        })
        .unwrap();
        r.register("basic", BasicOptions {}).unwrap();
        r
    }

    fn auth(text: &str) -> Auth {
        toml::from_str(text).unwrap()
    }

    fn validate(auth: &mut Auth, registry: &AuthMethodRegistry) -> Result<()> {
        let app = AppInfo::default();
        let cx = ValidationContext::new(&(), &app, registry);
        auth.validate(&cx)
    }

    #[test]
    fn duplicate_registration_keeps_the_first() {
        let mut r = registry();
        let err = r.register("jwt", BasicOptions {}).unwrap_err();
        assert!(matches!(err, Error::DuplicateAuthMethod(ref n) if n == "jwt"));
        assert_eq!(err.to_string(), "method \"jwt\" is already defined");

        let mut a = auth("[methods.jwt]\nenabled = false");
        validate(&mut a, &r).unwrap();
        assert!(a.methods["jwt"].options::<JwtOptions>().is_some());
    }

    #[test]
    fn scalar_options_are_rejected() {
        let mut r = AuthMethodRegistry::new();
        let err = r.register("odd", Scalar(1)).unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
        assert!(!r.contains("odd"));
    }

    #[test]
    fn enabled_method_is_merged_and_checked() {
        let r = registry();
        let mut a = auth(
            "[methods.jwt]\nenabled = true\nscore = 10\noptions = { secret = \"abc\", lifetime = 10 }",
        );
        validate(&mut a, &r).unwrap();

        let jwt = a.methods["jwt"].options::<JwtOptions>().unwrap();
        assert_eq!(jwt.secret, "abc");
        assert_eq!(jwt.lifetime, 10);
        assert_eq!(jwt.checked, 1);
    }

    #[test]
    fn disabled_method_is_merged_but_not_checked() {
        let r = registry();
        let mut a = auth("[methods.jwt]\nenabled = false\noptions = { secret = \"abc\" }");
        validate(&mut a, &r).unwrap();

        let jwt = a.methods["jwt"].options::<JwtOptions>().unwrap();
        assert_eq!(jwt.secret, "abc");
        assert_eq!(jwt.lifetime, 3600);
        assert_eq!(jwt.checked, 0);
    }

    #[test]
    fn unset_options_adopt_the_prototype() {
        let r = registry();
        let mut a = auth("[methods.basic]\nenabled = true");
        validate(&mut a, &r).unwrap();
        assert!(a.methods["basic"].options::<BasicOptions>().is_some());
        assert!(a.methods["basic"].options::<JwtOptions>().is_none());
    }

    #[test]
    fn problems_are_attributed_per_method() {
        let r = registry();
        let mut a = auth(
            "[methods.jwt]\nenabled = true\n[methods.ldap]\nenabled = true\n[methods.basic]\noptions = 5",
        );
        let err = validate(&mut a, &r).unwrap_err();
        let m = err.messages().unwrap();
        assert_eq!(m.len(), 3);
        assert!(m.contains("basic: options are integer, expected a table"));
        assert!(m.contains("jwt: secret is empty"));
        assert!(m.contains("unknown auth method \"ldap\""));
    }

    #[test]
    fn resolving_twice_keeps_the_value() {
        let r = registry();
        let mut a = auth("[methods.jwt]\nenabled = true\noptions = { secret = \"k\" }");
        validate(&mut a, &r).unwrap();
        validate(&mut a, &r).unwrap();
        assert_eq!(a.methods["jwt"].options::<JwtOptions>().unwrap().checked, 2);
    }

    #[test]
    fn users_are_split_into_name_and_groups() {
        let r = registry();
        let mut a = auth("[users]\n\"alice@admin, ops\" = \"pw1\"\nbob = \"pw2\"");
        validate(&mut a, &r).unwrap();

        assert_eq!(a.users["alice"].groups, vec!["admin", "ops"]);
        assert_eq!(a.users["alice"].password.expose_secret(), "pw1");
        assert!(a.users["bob"].groups.is_empty());
    }

    #[test]
    fn empty_user_or_group_is_an_error() {
        let r = registry();
        let mut a = auth("[users]\n\"@admin\" = \"x\"\n\"carol@admin,\" = \"y\"");
        let err = validate(&mut a, &r).unwrap_err();
        let m = err.messages().unwrap();
        assert!(m.contains("empty user name"));
        assert!(m.contains("empty group for user \"carol\""));
    }

    #[test]
    fn endpoint_rules_are_normalized() {
        let r = registry();
        let mut a = auth("[endpoints]\n\"//api//v1/\" = [\"alice\", \"!bob\", \" \", \"! \"]");
        validate(&mut a, &r).unwrap();

        let rules = &a.endpoints["/api/v1"];
        assert_eq!(rules.len(), 2);
        assert!(rules["alice"]);
        assert!(!rules["bob"]);
    }

    #[test]
    fn enabled_methods_are_ordered_by_score() {
        let r = registry();
        let mut a = auth(
            "[methods.basic]\nenabled = true\nscore = 1\n[methods.jwt]\nenabled = true\nscore = 5\noptions = { secret = \"s\" }",
        );
        validate(&mut a, &r).unwrap();
        let names: Vec<_> = a.enabled_methods().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["jwt", "basic"]);
    }
}
