//! Example: Blog Schema Evolution
//!
//! This example evolves a blog schema through two versions and prints the
//! migration each dialect would receive.
//!
//! Run with: cargo run --example blog_schema -p oxide-schema

use oxide_schema::prelude::*;

// =============================================================================
// Schema Versions
// =============================================================================

fn v1() -> Schema {
    Schema::new("blog")
        .version("1")
        .table(
            Table::new("users")
                .field(Field::new("id", FieldType::Serial).primary_key())
                .field(Field::new("username", FieldType::Varchar).length(100).not_null())
                .field(Field::new("email", FieldType::Varchar).length(255).not_null())
                .field(Field::new("is_active", FieldType::Boolean).not_null().default_value("true"))
                .field(Field::new("created_at", FieldType::Timestamp).auto_create())
                .index(Index::new("idx_users_username", vec!["username".to_string()]).unique()),
        )
        .table(
            Table::new("posts")
                .field(Field::new("id", FieldType::Serial).primary_key())
                .field(
                    Field::foreign_key("author_id", "users")
                        .not_null()
                        .on_delete(OnDelete::Cascade),
                )
                .field(Field::new("title", FieldType::Varchar).length(200).not_null())
                .field(Field::new("body", FieldType::Text))
                .field(Field::many_to_many("tags", "tags")),
        )
        .table(
            Table::new("tags")
                .field(Field::new("id", FieldType::Serial).primary_key())
                .field(Field::new("name", FieldType::Varchar).length(50).not_null()),
        )
}

fn v2() -> Schema {
    let mut schema = v1().version("2");

    if let Some(posts) = schema.get_table_mut("posts") {
        // Wider titles, a view counter and a publication date.
        if let Some(title) = posts.get_field_mut("title") {
            title.field_type = FieldType::Text;
        }
        posts.fields.push(Field::new("views", FieldType::Bigint).not_null().default_value("0"));
        posts.fields.push(Field::new("published_at", FieldType::Timestamp));
        posts.indexes.push(Index::new(
            "idx_posts_published_at",
            vec!["published_at".to_string()],
        ));
    }

    // Comments reference both users and posts.
    schema.tables.push(
        Table::new("comments")
            .field(Field::new("id", FieldType::Serial).primary_key())
            .field(Field::foreign_key("post_id", "posts").on_delete(OnDelete::Cascade))
            .field(Field::foreign_key("author_id", "users").on_delete(OnDelete::SetNull))
            .field(Field::new("body", FieldType::Text).not_null()),
    );

    schema
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let v1 = v1();
    let v2 = v2();
    v1.validate()?;
    v2.validate()?;

    let order = DependencyGraph::from_schema(&v2).creation_order(CyclePolicy::FailFast)?;
    println!("Creation order: {}", order.tables.join(", "));

    let diff = diff_schemas(Some(&v1), Some(&v2));
    println!("\nChanges:");
    for change in &diff.changes {
        println!("  {change}");
    }

    for dialect in ["postgresql", "mysql", "sqlite"] {
        let Some(provider) = provider_for(dialect) else {
            continue;
        };
        let planner = MigrationPlanner::new(provider.as_ref());

        let initial = diff_schemas(None, Some(&v1));
        let plan = planner.assemble(&initial, None, &v1, &mut AlwaysReview)?;
        println!("\n=== {dialect}: {} ===\n{}", plan.filename, plan.render());

        let plan = planner.assemble(&diff, Some(&v1), &v2, &mut AlwaysReview)?;
        println!("=== {dialect}: {} ===\n{}", plan.filename, plan.render());
    }

    Ok(())
}
