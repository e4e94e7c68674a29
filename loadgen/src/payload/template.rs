use std::fmt;

use handlebars::{
    Context, Handlebars, Helper, HelperResult, Output, RenderContext as HbsRenderContext,
    RenderError as HbsRenderError, RenderErrorReason,
};
use rand::{Rng as _, seq::IndexedRandom as _};
use serde_json::{Map, Value};

use eventpipe_ingest_lib::utils::time::now_unix_ms;

use super::{PayloadRenderer, RenderContext, RenderError, into_object, random_filler};

const TEMPLATE_NAME: &str = "payload";

/// Handlebars payload template, rendered in strict mode without HTML escaping.
///
/// Helpers: `uuid`, `randint a b`, `uniform a b`, `choice a b ..`,
/// `now_ms` and `filler n`.
pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
}

impl fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRenderer").finish_non_exhaustive()
    }
}

impl TemplateRenderer {
    pub fn try_new(template: &str) -> Result<Self, RenderError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);

        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("randint", Box::new(randint_helper));
        handlebars.register_helper("uniform", Box::new(uniform_helper));
        handlebars.register_helper("choice", Box::new(choice_helper));
        handlebars.register_helper("now_ms", Box::new(now_ms_helper));
        handlebars.register_helper("filler", Box::new(filler_helper));

        handlebars
            .register_template_string(TEMPLATE_NAME, template)
            .map_err(|err| RenderError::Template(err.to_string()))?;

        Ok(Self { handlebars })
    }
}

impl PayloadRenderer for TemplateRenderer {
    fn render(&self, ctx: &RenderContext) -> Result<Map<String, Value>, RenderError> {
        let rendered = self
            .handlebars
            .render(TEMPLATE_NAME, ctx)
            .map_err(map_render_error)?;

        let value: Value = serde_json::from_str(&rendered)
            .map_err(|err| RenderError::InvalidJson(err.to_string()))?;
        into_object(value)
    }
}

fn map_render_error(err: HbsRenderError) -> RenderError {
    match err.reason() {
        RenderErrorReason::MissingVariable(name) => {
            RenderError::MissingField(name.clone().unwrap_or_default())
        }
        RenderErrorReason::Other(msg) => RenderError::Helper(msg.clone()),
        RenderErrorReason::ParamNotFoundForIndex(helper, index) => {
            RenderError::Helper(format!("{helper}: missing parameter #{index}"))
        }
        _ => RenderError::Template(err.to_string()),
    }
}

fn number_param(h: &Helper, index: usize) -> Result<f64, HbsRenderError> {
    let param = h
        .param(index)
        .ok_or_else(|| RenderErrorReason::ParamNotFoundForIndex("number", index))?;
    param.value().as_f64().ok_or_else(|| {
        RenderErrorReason::Other(format!(
            "{}: parameter #{index} is not a number: {}",
            h.name(),
            param.value()
        ))
        .into()
    })
}

fn ordered_range(h: &Helper) -> Result<(f64, f64), HbsRenderError> {
    let lo = number_param(h, 0)?;
    let hi = number_param(h, 1)?;
    if lo > hi {
        return Err(RenderErrorReason::Other(format!(
            "{}: lower bound {lo} exceeds upper bound {hi}",
            h.name()
        ))
        .into());
    }
    Ok((lo, hi))
}

fn uuid_helper(
    _: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut HbsRenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&uuid::Uuid::new_v4().to_string())?;
    Ok(())
}

fn randint_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut HbsRenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let (lo, hi) = ordered_range(h)?;
    let value = rand::rng().random_range(lo as i64..=hi as i64);
    out.write(&value.to_string())?;
    Ok(())
}

fn uniform_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut HbsRenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let (lo, hi) = ordered_range(h)?;
    let value = if lo < hi {
        rand::rng().random_range(lo..hi)
    } else {
        lo
    };
    out.write(&value.to_string())?;
    Ok(())
}

fn choice_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut HbsRenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let picked = h
        .params()
        .choose(&mut rand::rng())
        .ok_or_else(|| RenderErrorReason::ParamNotFoundForIndex("choice", 0))?;

    match picked.value() {
        Value::String(s) => out.write(s)?,
        other => out.write(&other.to_string())?,
    }
    Ok(())
}

fn now_ms_helper(
    _: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut HbsRenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&now_unix_ms().to_string())?;
    Ok(())
}

fn filler_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut HbsRenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let len = match h.param(0) {
        Some(param) => param.value().as_u64().ok_or_else(|| {
            RenderErrorReason::Other(format!("filler: length is not a positive integer: {}", param.value()))
        })? as usize,
        None => 16,
    };
    out.write(&random_filler(len))?;
    Ok(())
}
