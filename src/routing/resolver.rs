//! # Entrance Resolver
//!
//! Matches an inbound `method` + path label against a channel's route table
//! and produces a request-scoped copy of the entrance.
//!
//! Matching is exact: the first entrance with a route whose method and label
//! both equal the request's wins. There is no template engine; labels are
//! plain strings.
//!
//! ## Signing-user override
//! When the request carries a tag that names a registered signing user who
//! may call the entrance, and the entrance has no signature requirement of
//! its own, the resolved copy gains one bound to that user's token. The
//! user's optional value sets restrict the request input, and the open API's
//! extra fields extend the payload schema. The shared channel snapshot is
//! never modified.

use serde_json::Value;
use tracing::debug;

use crate::auth::signature::{default_sign_field, DigestAlgorithm, SignOptions, SignToken, TokenOptions};
use crate::channel::setting::{SignApi, SignUser};
use crate::channel::{Authentication, Channel, Entrance};
use crate::core::types::RequestContext;
use crate::transform::path::{get_path, scalar_to_string, set_path};

/// A request-scoped entrance and the input it will be built from
#[derive(Debug, Clone)]
pub struct ResolvedEntrance {
    pub entrance: Entrance,
    pub input: Value,
    /// Name of the signing user whose override applied
    pub signing_user: Option<String>,
}

/// First entrance answering `method` + `label`
pub fn find_entrance<'a>(channel: &'a Channel, method: &str, label: Option<&str>) -> Option<&'a Entrance> {
    channel
        .entrances
        .iter()
        .find(|entrance| entrance.routes.iter().any(|route| route.matches(method, label)))
}

/// Resolve a request against a channel snapshot
///
/// Returns `None` when no entrance matches; callers map that to 404.
pub fn resolve(channel: &Channel, request: &RequestContext) -> Option<ResolvedEntrance> {
    let base = find_entrance(channel, request.method.as_str(), request.label.as_deref())?;
    let mut entrance = base.clone();
    let mut input = request.input.clone();
    let mut signing_user = None;

    let registry = channel.setting.signuser.as_ref();
    let user = request
        .tag
        .as_deref()
        .and_then(|tag| registry.and_then(|r| r.user_for(tag, &entrance.name)));

    if let (Some(user), Some(registry)) = (user, registry) {
        if !entrance.requires_signature() {
            let api = registry.api(&entrance.name);
            apply_signing_user(&mut entrance, &mut input, user, api);
            signing_user = Some(user.name.clone());
            debug!(
                channel = %channel.name,
                entrance = %entrance.name,
                signer = %user.name,
                "Applied signing-user override"
            );
        }
    }

    Some(ResolvedEntrance {
        entrance,
        input,
        signing_user,
    })
}

fn apply_signing_user(entrance: &mut Entrance, input: &mut Value, user: &SignUser, api: Option<&SignApi>) {
    entrance.authentication.push(Authentication::Signature {
        sign: SignOptions {
            token: SignToken::Many(vec![TokenOptions {
                key: user.token.clone(),
                name: user.name.clone(),
                tags: vec![user.id.clone()],
            }]),
            digest: api.and_then(|a| a.valid.clone()),
            algorithm: DigestAlgorithm::Md5,
            field: default_sign_field(),
            debug: false,
        },
    });

    let Some(api) = api else { return };

    for (path, set_name) in &api.props {
        let Some(allowed) = user.optional.get(set_name) else {
            continue;
        };
        let current = get_path(input, path).cloned();
        let was_array = matches!(current, Some(Value::Array(_)));
        let requested: Vec<String> = match current {
            Some(Value::Array(items)) => items.iter().map(scalar_to_string).collect(),
            Some(value) => scalar_to_string(&value).split(',').map(str::to_string).collect(),
            None => Vec::new(),
        };

        let permitted: Vec<Value> = allowed
            .iter()
            .filter(|value| requested.contains(&scalar_to_string(value)))
            .cloned()
            .collect();

        let restricted = if was_array {
            Value::Array(permitted)
        } else {
            Value::String(
                permitted
                    .iter()
                    .map(scalar_to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            )
        };
        set_path(input, path, restricted);
    }

    if !api.fields.is_empty() {
        entrance
            .payload
            .get_or_insert_with(Vec::new)
            .extend(api.fields.iter().cloned());
    }
}
