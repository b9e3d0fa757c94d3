//! The bind → validate → execute chain shared by every endpoint.
//!
//! A [`Pipeline`] carries either the typed request or the first failure. Once it
//! holds a failure, later stages are skipped and the failure is rendered directly
//! as the response envelope.

use std::{fmt::Display, future::Future};

use crate::{
    error::ApiError,
    response::Envelope,
    validation::{Locale, Validate},
};

#[derive(Debug)]
#[must_use = "a pipeline does nothing until `execute` is awaited"]
pub struct Pipeline<T> {
    state: Result<T, ApiError>,
}

impl<T> Pipeline<T> {
    /// Bind stage: a deserialization failure becomes `BadRequest` with its message.
    pub fn bind<E: Display>(input: Result<T, E>) -> Self {
        Self {
            state: input.map_err(|e| ApiError::BadRequest(e.to_string())),
        }
    }

    /// Binds a second request source (e.g. path then body) into a tuple.
    pub fn and_bind<U, E: Display>(self, input: Result<U, E>) -> Pipeline<(T, U)> {
        Pipeline {
            state: self.state.and_then(|first| {
                input
                    .map(|second| (first, second))
                    .map_err(|e| ApiError::BadRequest(e.to_string()))
            }),
        }
    }

    /// Validate stage: runs the request's declarative rules.
    pub fn validate(self, locale: Locale) -> Self
    where
        T: Validate,
    {
        Self {
            state: self.state.and_then(|req| match req.validate(locale) {
                Ok(()) => Ok(req),
                Err(message) => Err(ApiError::BadRequest(message)),
            }),
        }
    }

    /// Execute stage: runs the domain logic only if every earlier stage succeeded.
    pub async fn execute<R, F, Fut>(self, run: F) -> Envelope<R>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<R, ApiError>>,
    {
        match self.state {
            Ok(req) => run(req).await.into(),
            Err(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe<'a> {
        name: String,
        validated: &'a AtomicUsize,
    }

    impl Validate for Probe<'_> {
        fn validate(&self, _locale: Locale) -> Result<(), String> {
            self.validated.fetch_add(1, Ordering::SeqCst);
            if self.name.is_empty() {
                Err("name is required".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn bind_failure_skips_validate_and_execute() {
        let executed = AtomicUsize::new(0);

        let env: Envelope<()> = Pipeline::bind(Err::<Probe<'_>, _>("expected value at line 1"))
            .validate(Locale::En)
            .execute(|_| async {
                executed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(env.code, ErrorCode::BadRequest);
        assert_eq!(env.msg, "expected value at line 1");
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn validate_failure_skips_execute() {
        let validated = AtomicUsize::new(0);
        let executed = AtomicUsize::new(0);
        let probe = Probe { name: String::new(), validated: &validated };

        let env: Envelope<()> = Pipeline::bind(Ok::<_, String>(probe))
            .validate(Locale::En)
            .execute(|_| async {
                executed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(env.code, ErrorCode::BadRequest);
        assert_eq!(env.msg, "name is required");
        assert_eq!(validated.load(Ordering::SeqCst), 1);
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_is_code_200() {
        let validated = AtomicUsize::new(0);
        let probe = Probe { name: "ops".into(), validated: &validated };

        let env = Pipeline::bind(Ok::<_, String>(probe))
            .validate(Locale::En)
            .execute(|p| async move { Ok(p.name.len()) })
            .await;
        assert_eq!(env.code, ErrorCode::Success);
        assert_eq!(env.data, Some(3));
    }

    #[tokio::test]
    async fn domain_failure_keeps_its_classification() {
        let env: Envelope<()> = Pipeline::bind(Ok::<_, String>("ops"))
            .execute(|_| async { Err(ApiError::Conflict("duplicate".into())) })
            .await;
        assert_eq!(env.code, ErrorCode::Conflict);
        assert!(env.data.is_none());
    }

    #[tokio::test]
    async fn second_bind_failure_is_reported() {
        let env: Envelope<()> = Pipeline::bind(Ok::<_, String>(1))
            .and_bind(Err::<u8, _>("bad body"))
            .execute(|_| async { Ok(()) })
            .await;
        assert_eq!(env.code, ErrorCode::BadRequest);
        assert_eq!(env.msg, "bad body");
    }
}
