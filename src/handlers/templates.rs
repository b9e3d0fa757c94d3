use std::sync::LazyLock;

use axum::extract::State;
use uuid::Uuid;

use super::{JsonBody, PathParam, QueryParams, body, path, query, users::parse_ids};
use crate::{
    AppState,
    auth::CurrentUser,
    error::ApiError,
    models::{
        Affected, CreateTemplateRequest, DeleteTemplatesRequest, NewTemplate, Template,
        TemplateFilter, TemplatePage, TemplatePatch, TemplateQuery, UpdateTemplateRequest,
    },
    pipeline::Pipeline,
    response::Envelope,
    validation::{Check, Locale, Rules, Validate},
};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

static CREATE_TEMPLATE_RULES: LazyLock<Rules<CreateTemplateRequest>> = LazyLock::new(|| {
    Rules::new()
        .field(
            "name",
            |r: &CreateTemplateRequest| &r.name,
            [Check::required(), Check::length(1, 128)],
        )
        .field(
            "content",
            |r: &CreateTemplateRequest| &r.content,
            [Check::required(), Check::length(1, 65_536)],
        )
        .field(
            "description",
            |r: &CreateTemplateRequest| &r.description,
            [Check::length(0, 512)],
        )
});

impl Validate for CreateTemplateRequest {
    fn validate(&self, locale: Locale) -> Result<(), String> {
        CREATE_TEMPLATE_RULES.check(self, locale)
    }
}

static UPDATE_TEMPLATE_RULES: LazyLock<Rules<UpdateTemplateRequest>> = LazyLock::new(|| {
    Rules::new()
        .field(
            "name",
            |r: &UpdateTemplateRequest| &r.name,
            [Check::length(1, 128)],
        )
        .field(
            "content",
            |r: &UpdateTemplateRequest| &r.content,
            [Check::length(1, 65_536)],
        )
        .field(
            "description",
            |r: &UpdateTemplateRequest| &r.description,
            [Check::length(0, 512)],
        )
});

impl Validate for UpdateTemplateRequest {
    fn validate(&self, locale: Locale) -> Result<(), String> {
        UPDATE_TEMPLATE_RULES.check(self, locale)?;
        if self.name.is_none() && self.content.is_none() && self.description.is_none() {
            return Err("nothing to update".into());
        }
        Ok(())
    }
}

static DELETE_TEMPLATES_RULES: LazyLock<Rules<DeleteTemplatesRequest>> = LazyLock::new(|| {
    Rules::new().field(
        "ids",
        |r: &DeleteTemplatesRequest| &r.ids,
        [Check::min_items(1).message("at least one id is required"), Check::uuid()],
    )
});

impl Validate for DeleteTemplatesRequest {
    fn validate(&self, locale: Locale) -> Result<(), String> {
        DELETE_TEMPLATES_RULES.check(self, locale)
    }
}

static FILTER_RULES: LazyLock<Rules<TemplateFilter>> = LazyLock::new(|| {
    Rules::new()
        .field("name", |r: &TemplateFilter| &r.name, [Check::length(0, 128)])
        .field("page", |r: &TemplateFilter| &r.page, [Check::range(1, i64::from(i32::MAX))])
        .field(
            "page_size",
            |r: &TemplateFilter| &r.page_size,
            [Check::range(1, MAX_PAGE_SIZE)],
        )
});

impl Validate for TemplateFilter {
    fn validate(&self, locale: Locale) -> Result<(), String> {
        FILTER_RULES.check(self, locale)
    }
}

fn not_found() -> ApiError {
    ApiError::NotFound("template not found".to_string())
}

/// create_template
#[utoipa::path(
    post,
    path = "/template",
    tag = "templates",
    security(("bearer" = [])),
    request_body = CreateTemplateRequest,
    responses((status = 200, description = "Envelope carrying the new template", body = Template))
)]
pub async fn create_template(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: JsonBody<CreateTemplateRequest>,
) -> Envelope<Template> {
    Pipeline::bind(body(payload))
        .validate(state.config.locale)
        .execute(|req| async move {
            let template = state
                .templates
                .create(NewTemplate {
                    name: req.name.trim().to_string(),
                    content: req.content,
                    description: req.description,
                    created_by: user.id,
                })
                .await?;
            Ok(template)
        })
        .await
}

/// list_templates
///
/// Paged listing, newest first, optionally filtered by a name substring.
#[utoipa::path(
    get,
    path = "/template",
    tag = "templates",
    security(("bearer" = [])),
    params(TemplateFilter),
    responses((status = 200, description = "Envelope carrying one page of templates", body = TemplatePage))
)]
pub async fn list_templates(
    State(state): State<AppState>,
    filter: QueryParams<TemplateFilter>,
) -> Envelope<TemplatePage> {
    Pipeline::bind(query(filter))
        .validate(state.config.locale)
        .execute(|filter| async move {
            let page = filter.page.unwrap_or(1);
            let page_size = filter.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
            let (items, total) = state
                .templates
                .list(TemplateQuery {
                    name: filter.name.filter(|n| !n.trim().is_empty()),
                    limit: page_size,
                    offset: (page - 1) * page_size,
                })
                .await?;
            Ok(TemplatePage {
                items,
                total,
                page,
                page_size,
            })
        })
        .await
}

/// get_template
#[utoipa::path(
    get,
    path = "/template/{id}",
    tag = "templates",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Template id")),
    responses((status = 200, description = "Envelope carrying the template", body = Template))
)]
pub async fn get_template(
    State(state): State<AppState>,
    id: PathParam<Uuid>,
) -> Envelope<Template> {
    Pipeline::bind(path(id))
        .execute(|id| async move { state.templates.get(id).await?.ok_or_else(not_found) })
        .await
}

/// update_template
#[utoipa::path(
    put,
    path = "/template/{id}",
    tag = "templates",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Template id")),
    request_body = UpdateTemplateRequest,
    responses((status = 200, description = "Envelope carrying the updated template", body = Template))
)]
pub async fn update_template(
    State(state): State<AppState>,
    id: PathParam<Uuid>,
    payload: JsonBody<UpdateTemplateRequest>,
) -> Envelope<Template> {
    Pipeline::bind(path(id))
        .and_bind(body(payload))
        .validate(state.config.locale)
        .execute(|(id, req)| async move {
            let patch = TemplatePatch {
                name: req.name.map(|n| n.trim().to_string()),
                content: req.content,
                description: req.description,
            };
            Ok(state.templates.update(id, patch).await?)
        })
        .await
}

/// delete_templates
///
/// Batch delete. If any id is unknown nothing is deleted and the request fails
/// with code 400 naming the unknown ids.
#[utoipa::path(
    delete,
    path = "/template",
    tag = "templates",
    security(("bearer" = [])),
    request_body = DeleteTemplatesRequest,
    responses((status = 200, description = "Envelope carrying the number of deleted templates", body = Affected))
)]
pub async fn delete_templates(
    State(state): State<AppState>,
    payload: JsonBody<DeleteTemplatesRequest>,
) -> Envelope<Affected> {
    Pipeline::bind(body(payload))
        .validate(state.config.locale)
        .execute(|req| async move {
            let ids = parse_ids(&req.ids)?;
            let affected = state.templates.delete_batch(&ids).await?;
            tracing::info!(affected, "templates deleted");
            Ok(Affected { affected })
        })
        .await
}
