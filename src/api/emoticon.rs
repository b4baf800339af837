// 表情包接口
//
// 薄 HTTP 包装：解析查询参数、填默认值、调用核心流水线，
// 响应状态码跟随流水线返回的 code

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::api::AppState;
use crate::services::sticker::ListingRequest;

/// GET /api/emoticon 的查询参数
#[derive(Debug, Deserialize)]
pub struct EmoticonQuery {
    pub ac: Option<String>,
    pub wxid: Option<String>,
    pub start: Option<u32>,
    pub limit: Option<u32>,
    pub keyword: Option<String>,
}

impl From<EmoticonQuery> for ListingRequest {
    fn from(query: EmoticonQuery) -> Self {
        ListingRequest {
            ac: query.ac.unwrap_or_default(),
            wxid: query.wxid.unwrap_or_default(),
            start: query.start.unwrap_or(0),
            limit: query.limit.unwrap_or(40),
            keyword: query.keyword.unwrap_or_default(),
        }
    }
}

/// 获取/搜索表情包
pub async fn get_emoticons(
    State(state): State<AppState>,
    Query(query): Query<EmoticonQuery>,
) -> Response {
    let reply = state.service.process(query.into()).await;
    let status = StatusCode::from_u16(reply.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(reply)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults() {
        let query = EmoticonQuery {
            ac: Some("search".to_string()),
            wxid: Some("wxid_888888".to_string()),
            start: None,
            limit: None,
            keyword: None,
        };

        let request = ListingRequest::from(query);
        assert_eq!(request.start, 0);
        assert_eq!(request.limit, 40);
        assert_eq!(request.keyword, "");
    }

    #[test]
    fn test_query_missing_required_maps_to_empty() {
        let query = EmoticonQuery {
            ac: None,
            wxid: None,
            start: Some(40),
            limit: Some(20),
            keyword: Some("cat".to_string()),
        };

        let request = ListingRequest::from(query);
        // 校验放在核心流水线，这里只填空串
        assert_eq!(request.ac, "");
        assert_eq!(request.wxid, "");
        assert_eq!(request.start, 40);
        assert_eq!(request.limit, 20);
        assert_eq!(request.keyword, "cat");
    }
}
