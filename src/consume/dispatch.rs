//! Protocol binding dispatch: pick a scheme, a client and a form for an interaction.
//!
//! Dispatch is deterministic: given the same Thing Description, the same servient scheme
//! priority and the same options, it always lands on the same form. Clients are created lazily,
//! one per scheme per consumed Thing, with credentials installed at creation time.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::consume::{Inner, InteractionOptions};
use crate::error::{ConsumeError, ConsumeResult};
use crate::protocol::ProtocolClient;
use crate::security::CredentialsProvider;
use crate::template;
use crate::thing::{Form, FormOperation};

/// A form together with its derived URI scheme and original index.
///
/// The scheme comes from the form's own href when it is absolute, from the TD `base` when the
/// href is relative. Forms whose scheme cannot be derived are not augmentable and never take
/// part in dispatch.
pub(crate) struct AugmentedForm {
    pub(crate) form: Form,
    pub(crate) scheme: String,
    pub(crate) index: usize,
}

/// The URI scheme of an absolute href, if it has one.
pub(crate) fn href_scheme(href: &str) -> Option<&str> {
    let colon = href.find(':')?;
    let scheme = &href[..colon];
    let mut chars = scheme.chars();
    if !chars.next()?.is_ascii_alphabetic() {
        return None;
    }
    chars
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        .then_some(scheme)
}

/// The `scheme://authority` prefix of an href, if it has one.
pub(crate) fn scheme_and_authority(href: &str) -> Option<&str> {
    let authority_start = href.find("://")? + 3;
    let rest = &href[authority_start..];
    let end = rest
        .find(['/', '?', '#'])
        .map_or(href.len(), |offset| authority_start + offset);
    Some(&href[..end])
}

/// Resolve a relative href against the TD `base`.
fn resolve_href(base: &str, href: &str) -> String {
    if href.starts_with('/') {
        match scheme_and_authority(base) {
            Some(origin) => format!("{origin}{href}"),
            None => format!("{}{href}", base.trim_end_matches('/')),
        }
    } else {
        format!("{}/{href}", base.trim_end_matches('/'))
    }
}

/// Augment a form sequence: resolve hrefs and derive schemes, keeping original indices.
pub(crate) fn augment_forms(forms: &[Form], base: Option<&str>) -> Vec<AugmentedForm> {
    forms
        .iter()
        .enumerate()
        .filter_map(|(index, form)| {
            if let Some(scheme) = href_scheme(&form.href) {
                return Some(AugmentedForm {
                    scheme: scheme.to_string(),
                    form: form.clone(),
                    index,
                });
            }
            let base = base?;
            let scheme = href_scheme(base)?.to_string();
            let mut form = form.clone();
            form.href = resolve_href(base, &form.href);
            Some(AugmentedForm {
                form,
                scheme,
                index,
            })
        })
        .collect()
}

/// Distinct candidate schemes, ordered by the servient's priority list.
///
/// Schemes the servient does not know keep their discovery order at the tail.
pub(crate) fn ordered_schemes(augmented: &[AugmentedForm], priority: &[String]) -> Vec<String> {
    let mut schemes: Vec<String> = Vec::new();
    for augmented_form in augmented {
        if !schemes.contains(&augmented_form.scheme) {
            schemes.push(augmented_form.scheme.clone());
        }
    }
    schemes.sort_by_key(|scheme| {
        priority
            .iter()
            .position(|known| known == scheme)
            .unwrap_or(usize::MAX)
    });
    schemes
}

/// Pick the form to unlink a subscription established with form `subscribed_index`.
///
/// If the subscribed form itself carries the cancel operation it is reused. Otherwise every form
/// is scored: one point each for carrying the operation, sharing the subscribed form's
/// scheme+authority, and sharing its content type. The highest score wins, ties go to the lowest
/// index, a zero maximum means no form can unlink.
pub(crate) fn unsubscribe_form(
    augmented: &[AugmentedForm],
    subscribed_index: usize,
    operation: FormOperation,
) -> Option<Form> {
    let subscribed = augmented
        .iter()
        .find(|candidate| candidate.index == subscribed_index)?;
    if subscribed.form.op.contains(operation) {
        return Some(subscribed.form.clone());
    }

    let subscribed_origin = scheme_and_authority(&subscribed.form.href);
    let mut best: Option<(u8, &AugmentedForm)> = None;
    for candidate in augmented {
        // The subscribed form was already ruled out above; it would trivially match its own
        // origin and content type.
        if candidate.index == subscribed_index {
            continue;
        }
        let mut score = 0;
        if candidate.form.op.contains(operation) {
            score += 1;
        }
        if scheme_and_authority(&candidate.form.href) == subscribed_origin {
            score += 1;
        }
        if candidate.form.content_type == subscribed.form.content_type {
            score += 1;
        }
        match best {
            Some((high, _)) if high >= score => {}
            _ => best = Some((score, candidate)),
        }
    }

    match best {
        Some((score, candidate)) if score > 0 => Some(candidate.form.clone()),
        _ => None,
    }
}

/// Expand uri-variable placeholders in the form's href.
///
/// An expansion that changes nothing reuses the form as-is; otherwise a shallow clone carries
/// the expanded href.
fn expand_form(form: &Form, variables: &HashMap<String, String>) -> Form {
    match template::expand(&form.href, variables) {
        Some(href) => {
            let mut expanded = form.clone();
            expanded.href = href;
            expanded
        }
        None => form.clone(),
    }
}

/// The outcome of dispatch: a live client plus the form to drive it with.
pub(crate) struct DispatchedForm {
    pub(crate) client: Arc<dyn ProtocolClient>,
    pub(crate) form: Form,
    pub(crate) index: usize,
}

impl Inner {
    /// Resolve the client and form serving `operation` on the given form sequence.
    pub(crate) async fn dispatch(
        &self,
        forms: &[Form],
        operation: FormOperation,
        options: &InteractionOptions,
    ) -> ConsumeResult<DispatchedForm> {
        let augmented = augment_forms(forms, self.thing.base.as_deref());

        // An explicit form index bypasses scheme preference entirely.
        if let Some(index) = options.form_index {
            let chosen = augmented
                .iter()
                .find(|candidate| candidate.index == index)
                .ok_or_else(|| ConsumeError::NoFormForInteraction {
                    thing: self.label.clone(),
                    operation,
                })?;
            let client = self.client_for(&chosen.scheme, operation).await?.ok_or_else(|| {
                ConsumeError::NoClientFactoryForSchemes {
                    thing: self.label.clone(),
                    schemes: vec![chosen.scheme.clone()],
                }
            })?;
            return Ok(DispatchedForm {
                client,
                form: expand_form(&chosen.form, &options.uri_variables),
                index,
            });
        }

        let schemes = ordered_schemes(&augmented, &self.servient.supported_schemes());
        if schemes.is_empty() {
            return Err(ConsumeError::NoFormForInteraction {
                thing: self.label.clone(),
                operation,
            });
        }

        let mut selection = None;
        for scheme in &schemes {
            if let Some(client) = self.client_for(scheme, operation).await? {
                selection = Some((scheme.as_str(), client));
                break;
            }
        }
        let Some((scheme, client)) = selection else {
            return Err(ConsumeError::NoClientFactoryForSchemes {
                thing: self.label.clone(),
                schemes,
            });
        };

        let chosen = augmented
            .iter()
            .find(|candidate| candidate.scheme == scheme && candidate.form.op.contains(operation))
            .or_else(|| {
                // Default-op inference: a form with no explicit op serves any request.
                augmented
                    .iter()
                    .find(|candidate| candidate.scheme == scheme && candidate.form.op.is_default())
            })
            .ok_or_else(|| ConsumeError::NoFormForInteraction {
                thing: self.label.clone(),
                operation,
            })?;

        Ok(DispatchedForm {
            client,
            form: expand_form(&chosen.form, &options.uri_variables),
            index: chosen.index,
        })
    }

    /// The cached client for `scheme`, created through the factory on first use.
    ///
    /// The cache lock is held across creation so a concurrent first use of the same scheme
    /// invokes the factory exactly once. `None` means the servient has no factory for the
    /// scheme.
    async fn client_for(
        &self,
        scheme: &str,
        operation: FormOperation,
    ) -> ConsumeResult<Option<Arc<dyn ProtocolClient>>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(scheme) {
            return Ok(Some(Arc::clone(client)));
        }
        let Some(factory) = self.servient.factory_for(scheme) else {
            return Ok(None);
        };

        let mut client = factory.create_client();
        client.set_credentials_provider(CredentialsProvider::for_thing(
            &self.thing,
            &self.servient.credential_snapshot(),
        ));
        let client: Arc<dyn ProtocolClient> = Arc::from(client);
        client
            .start()
            .await
            .map_err(|source| ConsumeError::protocol(operation, source))?;
        debug!(scheme, thing = self.label.as_str(), "protocol client created");
        clients.insert(scheme.to_string(), Arc::clone(&client));
        Ok(Some(client))
    }
}
