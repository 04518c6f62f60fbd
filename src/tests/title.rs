use super::stubs::StubModel;
use crate::chat::{
    Author, ConversationStore, MemoryStore, TitleError, TitleGenerator, TitleOutcome,
};
use std::sync::Arc;

#[tokio::test]
async fn title_is_generated_once_and_frozen() {
    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(StubModel::new(&[], "Gene Panel Basics"));
    let generator = TitleGenerator::new(model.clone(), store.clone());

    let conversation = store.get_or_create(None).await.unwrap();
    let user = store
        .append_message(&conversation.id, Author::User, "What is a gene panel?")
        .await
        .unwrap();
    let reply = store
        .append_message(&conversation.id, Author::Assistant, "A targeted test.")
        .await
        .unwrap();
    let context = vec![user, reply];

    let outcome = generator.generate(&conversation.id, &context).await.unwrap();
    assert_eq!(
        outcome,
        TitleOutcome::Generated("Gene Panel Basics".to_string())
    );

    // already titled: no second model call
    let outcome = generator.generate(&conversation.id, &context).await.unwrap();
    assert_eq!(
        outcome,
        TitleOutcome::Unchanged("Gene Panel Basics".to_string())
    );
    assert_eq!(model.generate_count(), 1);
}

#[tokio::test]
async fn empty_context_is_rejected_before_the_model() {
    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(StubModel::new(&[], "unused"));
    let generator = TitleGenerator::new(model.clone(), store.clone());

    let conversation = store.get_or_create(None).await.unwrap();
    let result = generator.generate(&conversation.id, &[]).await;

    assert!(matches!(result, Err(TitleError::InsufficientContext)));
    assert_eq!(model.generate_count(), 0);
}

#[tokio::test]
async fn overlong_model_output_is_capped() {
    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(StubModel::new(&[], &"word ".repeat(60)));
    let generator = TitleGenerator::new(model, store.clone());

    let conversation = store.get_or_create(None).await.unwrap();
    let user = store
        .append_message(&conversation.id, Author::User, "hello")
        .await
        .unwrap();

    let outcome = generator
        .generate(&conversation.id, &[user])
        .await
        .unwrap();
    let TitleOutcome::Generated(title) = outcome else {
        panic!("expected a generated title");
    };
    assert_eq!(title.chars().count(), 100);
}
