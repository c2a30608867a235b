use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use bookspread_core::config::ServerConfig;
use bookspread_core::{
    DocumentId, EventQueue, Navigation, NavigationController, NavigationPolicy, PageSlot,
    PagingService, ReaderError, RemoteError,
};
use bookspread_remote::HttpPagingService;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

const COOKIE: &str = "session=reader-1";

/// In-memory stand-in for the book server: a page cursor per opened book.
#[derive(Default)]
struct Library {
    books: HashMap<String, usize>,
    cursors: HashMap<String, usize>,
    broken_pages: HashSet<usize>,
    page_requests: Vec<usize>,
    cleanups: usize,
    require_cookie: bool,
}

type Shared = Arc<Mutex<Library>>;
type Reply = (StatusCode, Json<Value>);

fn failure(status: StatusCode, message: &str) -> Reply {
    (status, Json(json!({ "error": message })))
}

fn authorized(library: &Library, headers: &HeaderMap) -> Result<(), Reply> {
    let cookie = headers.get(header::COOKIE).and_then(|v| v.to_str().ok());
    if library.require_cookie && cookie != Some(COOKIE) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Authentication required", "login_required": true })),
        ));
    }
    Ok(())
}

fn image(library: &Library, page: usize) -> Value {
    if library.broken_pages.contains(&page) {
        Value::Null
    } else {
        Value::String(format!("data:image/png;base64,cGFnZS0{page}"))
    }
}

fn spread(library: &Library, id: &str) -> Reply {
    let (Some(&total), Some(&current)) = (library.books.get(id), library.cursors.get(id)) else {
        return failure(
            StatusCode::NOT_FOUND,
            "PDF session not found. Please refresh the page.",
        );
    };
    let page = |n: usize| json!({ "page_number": n, "image_data": image(library, n) });
    let right = if current < total {
        page(current + 1)
    } else {
        Value::Null
    };
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "left_page": page(current),
            "right_page": right,
            "current_page_num": current,
            "total_pages": total,
        })),
    )
}

async fn initialize(
    State(library): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Reply {
    let mut library = library.lock();
    if let Err(reply) = authorized(&library, &headers) {
        return reply;
    }
    let Some(&total) = library.books.get(&id) else {
        return failure(StatusCode::NOT_FOUND, "File not found");
    };
    library.cursors.insert(id.clone(), 1);
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "total_pages": total,
            "file_id": id,
            "session_key": format!("1_{id}"),
        })),
    )
}

async fn current_spread(State(library): State<Shared>, Path(id): Path<String>) -> Reply {
    spread(&library.lock(), &id)
}

async fn navigate(
    State(library): State<Shared>,
    Path((id, direction)): Path<(String, String)>,
) -> Reply {
    let mut library = library.lock();
    let total = library.books.get(&id).copied().unwrap_or(0);
    let Some(current) = library.cursors.get_mut(&id) else {
        return failure(
            StatusCode::NOT_FOUND,
            "PDF session not found. Please refresh the page.",
        );
    };
    let moved = match direction.as_str() {
        "next" if *current < total => {
            *current = if *current + 2 <= total { *current + 2 } else { *current + 1 };
            true
        }
        "prev" if *current > 1 => {
            *current = current.saturating_sub(2).max(1);
            true
        }
        _ => false,
    };
    if !moved {
        return failure(
            StatusCode::BAD_REQUEST,
            &format!("Cannot navigate {direction}"),
        );
    }
    spread(&library, &id)
}

async fn goto(
    State(library): State<Shared>,
    Path((id, page)): Path<(String, usize)>,
) -> Reply {
    let mut library = library.lock();
    let total = library.books.get(&id).copied().unwrap_or(0);
    let Some(current) = library.cursors.get_mut(&id) else {
        return failure(
            StatusCode::NOT_FOUND,
            "PDF session not found. Please refresh the page.",
        );
    };
    if !(1..=total).contains(&page) {
        return failure(StatusCode::BAD_REQUEST, "Invalid page number");
    }
    *current = page;
    spread(&library, &id)
}

async fn page(
    State(library): State<Shared>,
    Path((id, page)): Path<(String, usize)>,
) -> Reply {
    let mut library = library.lock();
    library.page_requests.push(page);
    let Some(&total) = library.books.get(&id) else {
        return failure(StatusCode::NOT_FOUND, "File not found");
    };
    if !(1..=total).contains(&page) {
        return failure(StatusCode::BAD_REQUEST, "Invalid page number");
    }
    if library.broken_pages.contains(&page) {
        return failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to get page: render error",
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "page_num": page,
            "image": image(&library, page),
            "total_pages": total,
        })),
    )
}

async fn cleanup(State(library): State<Shared>, Path(id): Path<String>) -> Reply {
    let mut library = library.lock();
    library.cursors.remove(&id);
    library.cleanups += 1;
    (
        StatusCode::OK,
        Json(json!({ "success": true, "message": "Session cleaned up" })),
    )
}

async fn spawn_server(books: &[(&str, usize)]) -> (ServerConfig, Shared) {
    let library: Shared = Arc::new(Mutex::new(Library {
        books: books
            .iter()
            .map(|(id, total)| (id.to_string(), *total))
            .collect(),
        ..Library::default()
    }));

    let app = Router::new()
        .route("/api/book/:id/initialize", get(initialize))
        .route("/api/book/:id/current-spread", get(current_spread))
        .route("/api/book/:id/navigate/:direction", get(navigate))
        .route("/api/book/:id/goto/:page", get(goto))
        .route("/api/book/:id/page/:page", get(page))
        .route("/api/book/:id/cleanup", get(cleanup))
        .with_state(Arc::clone(&library));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = ServerConfig {
        base_url: format!("http://{addr}"),
        request_timeout: Duration::from_secs(5),
        cookie: Some(COOKIE.to_owned()),
    };
    (config, library)
}

async fn wait_for(library: &Shared, check: impl Fn(&Library) -> bool) -> bool {
    for _ in 0..100 {
        if check(&library.lock()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn initialize_and_walk_the_book() {
    let (config, _library) = spawn_server(&[("book", 5)]).await;
    let service = HttpPagingService::new(&config).unwrap();
    let book = DocumentId::from("book");

    assert_eq!(service.initialize(&book).await.unwrap(), 5);

    let snapshot = service.current_spread(&book).await.unwrap();
    assert_eq!(snapshot.current_page, 1);
    assert_eq!(snapshot.total_pages, Some(5));
    assert_eq!(snapshot.right.as_ref().map(|p| p.page_number), Some(2));

    let snapshot = service.navigate_next(&book).await.unwrap();
    assert_eq!(snapshot.current_page, 3);
    let snapshot = service.navigate_next(&book).await.unwrap();
    assert_eq!(snapshot.current_page, 5);
    assert!(snapshot.right.is_none());
    assert!(snapshot.left.unwrap().image.is_some());

    let err = service.navigate_next(&book).await.unwrap_err();
    assert!(err.is_boundary(), "{err:?}");

    let snapshot = service.navigate_prev(&book).await.unwrap();
    assert_eq!(snapshot.current_page, 3);
    let snapshot = service.goto(&book, 2).await.unwrap();
    assert_eq!(snapshot.current_page, 2);
}

#[tokio::test]
async fn service_errors_carry_status_and_message() {
    let (config, _library) = spawn_server(&[("book", 5)]).await;
    let service = HttpPagingService::new(&config).unwrap();
    let book = DocumentId::from("book");

    let err = service.current_spread(&book).await.unwrap_err();
    assert_eq!(
        err,
        RemoteError::Service {
            status: 404,
            message: "PDF session not found. Please refresh the page.".into()
        }
    );

    let err = service.initialize(&DocumentId::from("missing")).await.unwrap_err();
    assert!(matches!(err, RemoteError::Service { status: 404, .. }));

    service.initialize(&book).await.unwrap();
    let err = service.goto(&book, 9).await.unwrap_err();
    assert_eq!(
        err,
        RemoteError::Service {
            status: 400,
            message: "Invalid page number".into()
        }
    );
    assert!(!err.is_boundary());
}

#[tokio::test]
async fn fetch_page_returns_the_data_uri() {
    let (config, library) = spawn_server(&[("book", 5)]).await;
    library.lock().broken_pages.insert(4);
    let service = HttpPagingService::new(&config).unwrap();
    let book = DocumentId::from("book");

    let payload = service.fetch_page(&book, 2).await.unwrap();
    assert!(payload.as_str().starts_with("data:image/png;base64,"));

    let err = service.fetch_page(&book, 4).await.unwrap_err();
    assert!(matches!(err, RemoteError::Service { status: 500, .. }));
    assert_eq!(library.lock().page_requests, vec![2, 4]);
}

#[tokio::test]
async fn cookie_is_forwarded() {
    let (mut config, library) = spawn_server(&[("book", 3)]).await;
    library.lock().require_cookie = true;

    let service = HttpPagingService::new(&config).unwrap();
    assert_eq!(service.initialize(&DocumentId::from("book")).await.unwrap(), 3);

    config.cookie = None;
    let anonymous = HttpPagingService::new(&config).unwrap();
    let err = anonymous
        .initialize(&DocumentId::from("book"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RemoteError::Service {
            status: 401,
            message: "Authentication required".into()
        }
    );
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let service = HttpPagingService::new(&ServerConfig {
        base_url: format!("http://{addr}"),
        request_timeout: Duration::from_secs(2),
        cookie: None,
    })
    .unwrap();
    let err = service
        .initialize(&DocumentId::from("book"))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Transport(_)), "{err:?}");
}

#[tokio::test]
async fn controller_reads_through_http() {
    let (config, library) = spawn_server(&[("book", 7)]).await;
    library.lock().broken_pages.insert(6);
    let service = Arc::new(HttpPagingService::new(&config).unwrap());
    let events = EventQueue::new();
    let controller = NavigationController::new(
        service,
        Arc::new(events.clone()),
        NavigationPolicy::LatestWins,
    );

    controller.initialize("book".into()).await.unwrap();
    assert_eq!(library.lock().page_requests, vec![1, 2]);

    // Spread responses embed their images, so these need no page requests.
    let Navigation::Moved(view) = controller.go_next().await.unwrap() else {
        panic!("expected to move");
    };
    assert_eq!((view.spread.left, view.spread.right), (3, Some(4)));
    assert_eq!(library.lock().page_requests, vec![1, 2]);

    let Navigation::Moved(view) = controller.go_next().await.unwrap() else {
        panic!("expected to move");
    };
    assert!(matches!(view.right, Some(PageSlot::Failed { page: 6, .. })));
    assert_eq!(library.lock().page_requests, vec![1, 2, 6]);

    let Navigation::Moved(view) = controller.go_to(7).await.unwrap() else {
        panic!("expected to move");
    };
    assert!(view.right.is_none());
    assert_eq!(controller.go_next().await.unwrap(), Navigation::Boundary);

    assert_eq!(
        controller.go_to(99).await.unwrap_err(),
        ReaderError::OutOfRange { page: 99, total: 7 }
    );

    controller.close().unwrap();
    assert!(wait_for(&library, |library| library.cleanups == 1).await);
    assert!(library.lock().cursors.is_empty());
}
