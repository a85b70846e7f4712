use actix_web::error::InternalError;
use actix_web::http::StatusCode;
use actix_web::{web, Error, HttpResponse};
use serde_derive::Serialize;

#[derive(Serialize)]
pub(crate) struct JsonResponse<T> {
    pub(crate) message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) item: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) list: Option<Vec<T>>,
}

pub(crate) struct JsonResponseBuilder<T>
where
    T: serde::Serialize,
{
    message: String,
    item: Option<T>,
    list: Option<Vec<T>>,
}

impl<T> JsonResponseBuilder<T>
where
    T: serde::Serialize,
{
    pub(crate) fn set_msg<I: Into<String>>(mut self, msg: I) -> Self {
        self.message = msg.into();
        self
    }

    pub(crate) fn set_item(mut self, item: T) -> Self {
        self.item = Some(item);
        self
    }

    pub(crate) fn set_list(mut self, list: Vec<T>) -> Self {
        self.list = Some(list);
        self
    }

    fn into_response(self) -> JsonResponse<T> {
        JsonResponse {
            message: self.message,
            item: self.item,
            list: self.list,
        }
    }

    pub(crate) fn ok<I: Into<String>>(self, msg: I) -> web::Json<JsonResponse<T>> {
        web::Json(self.set_msg(msg).into_response())
    }

    pub(crate) fn to_json_response(self, status: StatusCode) -> HttpResponse {
        HttpResponse::build(status).json(self.into_response())
    }

    fn error<I: Into<String>>(self, status: StatusCode, msg: I) -> Error {
        let msg = msg.into();
        let response = self.set_msg(msg.clone()).to_json_response(status);
        InternalError::from_response(msg, response).into()
    }

    pub(crate) fn unauthorized<I: Into<String>>(self, msg: I) -> Error {
        self.error(StatusCode::UNAUTHORIZED, msg)
    }

    pub(crate) fn not_found<I: Into<String>>(self, msg: I) -> Error {
        self.error(StatusCode::NOT_FOUND, msg)
    }

    pub(crate) fn internal_server_error<I: Into<String>>(self, msg: I) -> Error {
        let msg = msg.into();
        let msg = if msg.trim().is_empty() {
            "Internal error".to_string()
        } else {
            msg
        };
        self.error(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl<T> JsonResponse<T>
where
    T: serde::Serialize,
{
    pub(crate) fn build() -> JsonResponseBuilder<T> {
        JsonResponseBuilder {
            message: String::new(),
            item: None,
            list: None,
        }
    }
}
