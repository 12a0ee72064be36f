#[cfg(test)]
mod parser_tests {
    use pretty_assertions::assert_eq;

    use rox::ast::*;
    use rox::parser::Parser;
    use rox::scanner::scan;
    use rox::token::TokenType;

    fn parse(source: &str) -> Vec<Stmt> {
        let (tokens, errors) = scan(source.as_bytes());
        assert!(errors.is_empty(), "scan errors: {:?}", errors);

        Parser::new(tokens).parse().expect("program parses")
    }

    fn parse_errors(source: &str) -> Vec<String> {
        let (tokens, _) = scan(source.as_bytes());

        match Parser::new(tokens).parse() {
            Ok(_) => Vec::new(),
            Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn expression(source: &str) -> Result<Expr, Vec<String>> {
        let (tokens, _) = scan(source.as_bytes());

        Parser::new(tokens)
            .parse_expression()
            .map_err(|errors| errors.iter().map(|e| e.to_string()).collect())
    }

    fn number(expr: &Expr) -> Option<f64> {
        match expr {
            Expr::Literal(LiteralValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    #[test]
    fn test_print_of_a_sum() {
        let program = parse("print 1 + 2;");
        assert_eq!(program.len(), 1);

        let Stmt::Print(Expr::Binary {
            left,
            operator,
            right,
        }) = &program[0]
        else {
            panic!("expected print of a binary expression, got {:?}", program[0]);
        };

        assert_eq!(number(left), Some(1.0));
        assert_eq!(operator.token_type, TokenType::PLUS);
        assert_eq!(number(right), Some(2.0));
    }

    #[test]
    fn test_factor_binds_tighter_than_term() {
        let expr = expression("1 + 2 * 3").expect("valid expression");

        let Expr::Binary {
            left,
            operator,
            right,
        } = expr
        else {
            panic!("expected binary");
        };

        assert_eq!(number(&left), Some(1.0));
        assert_eq!(operator.lexeme, "+");
        assert!(matches!(
            *right,
            Expr::Binary { ref operator, .. } if operator.lexeme == "*"
        ));
    }

    #[test]
    fn test_conditional_is_right_associative() {
        let expr = expression("a ? b : c ? d : e").expect("valid expression");

        let Expr::Conditional { else_branch, .. } = expr else {
            panic!("expected conditional");
        };
        assert!(matches!(*else_branch, Expr::Conditional { .. }));
    }

    #[test]
    fn test_comma_has_lowest_precedence() {
        let expr = expression("a = 1, b = 2").expect("valid expression");

        let Expr::Binary {
            left,
            operator,
            right,
        } = expr
        else {
            panic!("expected comma expression");
        };

        assert_eq!(operator.token_type, TokenType::COMMA);
        assert!(matches!(*left, Expr::Assign { .. }));
        assert!(matches!(*right, Expr::Assign { .. }));
    }

    #[test]
    fn test_commas_inside_calls_separate_arguments() {
        let expr = expression("f(1, 2, 3)").expect("valid expression");

        assert!(matches!(expr, Expr::Call { ref arguments, .. } if arguments.len() == 3));
    }

    #[test]
    fn test_property_assignment_becomes_set() {
        let program = parse("obj.field = 3;");

        assert!(matches!(
            &program[0],
            Stmt::Expression(Expr::Set { name, .. }) if name.lexeme == "field"
        ));
    }

    #[test]
    fn test_invalid_assignment_target_is_reported() {
        assert_eq!(
            parse_errors("1 = 2;"),
            vec!["[line 1] Error at '=': Invalid assignment target."]
        );
    }

    #[test]
    fn test_errors_synchronize_to_the_next_statement() {
        assert_eq!(
            parse_errors("var = 1;\nprint ;\nvar ok = 2;"),
            vec![
                "[line 1] Error at '=': Expect variable name.",
                "[line 2] Error at ';': Expect expression.",
            ]
        );
    }

    #[test]
    fn test_missing_left_operand() {
        assert_eq!(
            parse_errors("* 3;"),
            vec!["[line 1] Error at '*': Missing left-hand operand."]
        );
        assert_eq!(
            parse_errors("print == 1;"),
            vec!["[line 1] Error at '==': Missing left-hand operand."]
        );
        assert!(parse_errors("print -3;").is_empty());
    }

    #[test]
    fn test_break_only_inside_loops() {
        assert!(parse_errors("while (true) { break; }").is_empty());

        assert_eq!(
            parse_errors("break;"),
            vec!["[line 1] Error at 'break': Must be inside a loop to use 'break'."]
        );
        assert_eq!(
            parse_errors("while (true) { fun f() { break; } }"),
            vec!["[line 1] Error at 'break': Must be inside a loop to use 'break'."]
        );
    }

    #[test]
    fn test_for_desugars_into_while() {
        let program = parse("for (var i = 0; i < 3; i = i + 1) print i;");
        assert_eq!(program.len(), 1);

        let Stmt::Block(outer) = &program[0] else {
            panic!("expected outer block");
        };
        assert!(matches!(outer[0], Stmt::Var { .. }));

        let Stmt::While { body, .. } = &outer[1] else {
            panic!("expected while loop");
        };
        let Stmt::Block(inner) = body.as_ref() else {
            panic!("expected body block");
        };
        assert!(matches!(inner[0], Stmt::Print(_)));
        assert!(matches!(inner[1], Stmt::Expression(Expr::Assign { .. })));
    }

    #[test]
    fn test_for_without_condition_loops_on_true() {
        let program = parse("for (;;) break;");

        assert!(matches!(
            &program[0],
            Stmt::While {
                condition: Expr::Literal(LiteralValue::True),
                ..
            }
        ));
    }

    #[test]
    fn test_class_header_and_method_sets() {
        let program = parse("class B < A with T, U { init() {} class make() {} }");

        let Stmt::Class(decl) = &program[0] else {
            panic!("expected class");
        };

        assert_eq!(decl.name.lexeme, "B");
        assert!(matches!(
            &decl.superclass,
            Some(Expr::Variable { name, .. }) if name.lexeme == "A"
        ));
        assert_eq!(decl.traits.len(), 2);
        assert_eq!(decl.methods.len(), 1);
        assert_eq!(decl.methods[0].display_name(), "init");
        assert_eq!(decl.class_methods.len(), 1);
        assert_eq!(decl.class_methods[0].display_name(), "make");
    }

    #[test]
    fn test_trait_declaration() {
        let program = parse("trait Greets with Named { greet() {} }");

        let Stmt::Trait(decl) = &program[0] else {
            panic!("expected trait");
        };
        assert_eq!(decl.name.lexeme, "Greets");
        assert_eq!(decl.traits.len(), 1);
        assert_eq!(decl.methods.len(), 1);
    }

    #[test]
    fn test_anonymous_function_expression() {
        let program = parse("var f = fun (x) { return x; };");

        let Stmt::Var {
            initializer: Some(Expr::Lambda(decl)),
            ..
        } = &program[0]
        else {
            panic!("expected lambda initializer");
        };
        assert_eq!(decl.name, None);
        assert_eq!(decl.display_name(), "anonymous");
        assert_eq!(decl.params.len(), 1);
    }

    #[test]
    fn test_expression_mode_errors() {
        assert_eq!(
            expression("1 +").map(|_| ()),
            Err(vec!["[line 1] Error at end: Expect expression.".to_string()])
        );
        assert_eq!(
            expression("1 2").map(|_| ()),
            Err(vec!["[line 1] Error at '2': Expect end of expression.".to_string()])
        );
    }

    #[test]
    fn test_identical_expressions_get_distinct_ids() {
        let program = parse("a; a;");

        let ids: Vec<ExprId> = program
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::Expression(Expr::Variable { id, .. }) => Some(*id),
                _ => None,
            })
            .collect();

        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }
}
