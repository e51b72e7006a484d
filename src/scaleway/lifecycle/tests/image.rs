//! Tests for image resolution and selection logic.

use std::cell::Cell;
use std::rc::Rc;

use scaleway_rs::ScalewayImage;

use super::{ImageSpec, backend_fixture, image};
use crate::scaleway::ScalewayBackendError;

const AVAILABLE_X86: ImageSpec = ImageSpec {
    id: "img",
    arch: "x86_64",
    state: "available",
    creation_date: "2025-01-01T00:00:00Z",
};

#[test]
fn select_image_id_returns_newest_creation_date() {
    let images = vec![
        image(ImageSpec {
            id: "older",
            ..AVAILABLE_X86
        }),
        image(ImageSpec {
            id: "newest",
            creation_date: "2025-02-01T00:00:00Z",
            ..AVAILABLE_X86
        }),
    ];

    let id = backend_fixture()
        .select_image_id(images)
        .expect("image selected");
    assert_eq!(id, "newest");
}

#[test]
fn select_image_id_errors_on_empty() {
    let err = backend_fixture()
        .select_image_id(Vec::<ScalewayImage>::new())
        .expect_err("empty candidates should fail");
    assert_eq!(
        err,
        ScalewayBackendError::ImageNotFound {
            label: String::from("Ubuntu 24.04 Noble Numbat"),
            arch: String::from("x86_64"),
            zone: String::from("fr-par-1"),
        }
    );
}

#[test]
fn filter_images_drops_foreign_arch_and_unavailable() {
    let images = vec![
        image(ImageSpec {
            id: "arm",
            arch: "arm64",
            ..AVAILABLE_X86
        }),
        image(ImageSpec {
            id: "creating",
            state: "creating",
            ..AVAILABLE_X86
        }),
        image(AVAILABLE_X86),
    ];

    let kept: Vec<String> = backend_fixture()
        .filter_images(images)
        .into_iter()
        .map(|candidate| candidate.id)
        .collect();
    assert_eq!(kept, vec![String::from("img")]);
}

#[tokio::test]
#[expect(
    clippy::excessive_nesting,
    reason = "nested async closures keep fixtures inline for readability"
)]
async fn resolve_image_id_prefers_project_results() {
    let project_called = Rc::new(Cell::new(false));
    let public_called = Rc::new(Cell::new(false));

    let result = backend_fixture()
        .resolve_image_id_with(
            {
                let flag = Rc::clone(&project_called);
                move || {
                    flag.set(true);
                    async {
                        Ok(vec![image(ImageSpec {
                            id: "project-img",
                            ..AVAILABLE_X86
                        })])
                    }
                }
            },
            {
                let flag = Rc::clone(&public_called);
                move || {
                    flag.set(true);
                    async {
                        Ok(vec![image(ImageSpec {
                            id: "public-img",
                            ..AVAILABLE_X86
                        })])
                    }
                }
            },
        )
        .await
        .expect("project image should resolve");

    assert_eq!(result, "project-img");
    assert!(project_called.get());
    assert!(!public_called.get(), "public lookup should not be needed");
}

#[tokio::test]
async fn resolve_image_id_falls_back_to_public() {
    let result = backend_fixture()
        .resolve_image_id_with(
            || async {
                Ok(vec![image(ImageSpec {
                    id: "project-arm",
                    arch: "arm64",
                    ..AVAILABLE_X86
                })])
            },
            || async {
                Ok(vec![image(ImageSpec {
                    id: "public-img",
                    ..AVAILABLE_X86
                })])
            },
        )
        .await
        .expect("public fallback should resolve");

    assert_eq!(result, "public-img");
}

#[tokio::test]
async fn resolve_image_id_propagates_errors() {
    let err = backend_fixture()
        .resolve_image_id_with(
            || async {
                Err(ScalewayBackendError::Provider {
                    message: "boom".to_owned(),
                })
            },
            || async { Ok(Vec::new()) },
        )
        .await
        .expect_err("error should surface");

    assert!(matches!(err, ScalewayBackendError::Provider { message } if message == "boom"));
}
