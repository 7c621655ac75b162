use axum::response::{Html, IntoResponse};

pub async fn index() -> impl IntoResponse {
    Html(
        "<!DOCTYPE html>
<html>
<head><title>block-server</title></head>
<body><h1>Hello, visitor</h1></body>
</html>",
    )
}

pub async fn health_check() -> &'static str {
    "OK"
}
